//! Reconciliation engine: raw event in, persisted record out.

use std::fmt;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::coerce;
use crate::error::{ReconciliationError, StoreError};
use crate::event::RawEvent;
use crate::ipfs::{ContentFetcher, ContentResolver};
use crate::models::{Address, RecordId, RecordKind};
use crate::schema::{
    raw_value, Coercer, EventKind, FieldSpec, FieldValue, Fields, Phase, SchemaRegistry, Source,
};
use crate::store::RecordStore;

/// Progress of a single event through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    SchemaSelected,
    FieldsCoerced,
    CrossReferencesResolved,
    ExternalContentResolved,
    Persisted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::SchemaSelected => "schema_selected",
            Stage::FieldsCoerced => "fields_coerced",
            Stage::CrossReferencesResolved => "cross_references_resolved",
            Stage::ExternalContentResolved => "external_content_resolved",
            Stage::Persisted => "persisted",
        };
        f.write_str(s)
    }
}

fn reached(stage: Stage) {
    debug!(%stage, "stage reached");
}

/// Turns raw contract events into validated, cross-referenced records.
///
/// Events from one stream must be applied one at a time, in block order:
/// later events rely on records committed by earlier ones.
pub struct ReconciliationEngine<S, F> {
    store: S,
    resolver: ContentResolver<F>,
    schemas: SchemaRegistry,
}

impl<S: RecordStore, F: ContentFetcher> ReconciliationEngine<S, F> {
    pub fn new(store: S, fetcher: F) -> Self {
        Self {
            store,
            resolver: ContentResolver::new(fetcher),
            schemas: SchemaRegistry::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one raw event.
    ///
    /// Re-applying a creation event whose record already exists with the
    /// same variant succeeds without writing anything.
    #[instrument(
        skip(self, event),
        fields(event = %event.name, contract = %event.address, block = event.block.number)
    )]
    pub async fn apply(&self, event: &RawEvent) -> Result<RecordId, ReconciliationError> {
        reached(Stage::Received);
        let kind = EventKind::from_event_name(event.short_name())
            .ok_or_else(|| ReconciliationError::UnknownEvent(event.name.clone()))?;

        match kind {
            EventKind::Create(kind) => self.create(kind, event).await,
            EventKind::OutcomeAssignment => self.assign_outcome(event).await,
        }
    }

    async fn create(
        &self,
        kind: RecordKind,
        event: &RawEvent,
    ) -> Result<RecordId, ReconciliationError> {
        let schema = self
            .schemas
            .get(kind)
            .ok_or_else(|| ReconciliationError::UnknownEvent(event.name.clone()))?;
        reached(Stage::SchemaSelected);

        let mut fields = Fields::default();
        self.coerce_phase(schema.phase(Phase::Plain), event, &mut fields)
            .await?;
        reached(Stage::FieldsCoerced);

        let address = fields.address("address")?;
        if let Some(id) = self.existing(kind, address).await? {
            info!("Skipping replayed {} creation for {}", kind, address);
            return Ok(id);
        }

        self.coerce_phase(schema.phase(Phase::Reference), event, &mut fields)
            .await?;
        reached(Stage::CrossReferencesResolved);

        self.coerce_phase(schema.phase(Phase::Content), event, &mut fields)
            .await?;
        reached(Stage::ExternalContentResolved);

        let record = fields.into_record(kind)?;
        let id = match self.store.put(&record).await {
            Ok(id) => id,
            Err(StoreError::DuplicateKey(key)) => match self.existing(kind, address).await? {
                Some(id) => {
                    info!("{} {} created concurrently, treating as replay", kind, address);
                    id
                }
                None => return Err(StoreError::DuplicateKey(key).into()),
            },
            Err(e) => return Err(e.into()),
        };
        reached(Stage::Persisted);

        info!("Created {} {}", kind, address);
        Ok(id)
    }

    /// Idempotence check: same variant is a replay, another variant a conflict.
    async fn existing(
        &self,
        kind: RecordKind,
        address: Address,
    ) -> Result<Option<RecordId>, ReconciliationError> {
        match self.store.find_kind(&address).await? {
            None => Ok(None),
            Some(existing) if existing == kind => Ok(Some(RecordId { kind, address })),
            Some(existing) => Err(ReconciliationError::AddressVariantConflict {
                address,
                existing,
                requested: kind,
            }),
        }
    }

    async fn coerce_phase<'a>(
        &self,
        specs: impl Iterator<Item = &'a FieldSpec>,
        event: &RawEvent,
        fields: &mut Fields,
    ) -> Result<(), ReconciliationError> {
        for spec in specs {
            match raw_value(event, spec)? {
                Some(raw) => {
                    let value = self.coerce(spec, &raw).await?;
                    fields.insert(spec.field, value);
                }
                None => fields.insert_default(spec),
            }
        }
        Ok(())
    }

    async fn coerce(
        &self,
        spec: &FieldSpec,
        raw: &Value,
    ) -> Result<FieldValue, ReconciliationError> {
        let name = match spec.source {
            Source::Param(param) => param,
            _ => spec.field,
        };

        let value = match spec.coercer {
            Coercer::Address => FieldValue::Address(coerce::address(name, raw)?),
            Coercer::Integer => FieldValue::Int(coerce::integer(name, raw)?),
            Coercer::Unsigned => FieldValue::Int(coerce::unsigned(name, raw)?),
            Coercer::Amount => FieldValue::Amount(coerce::amount(name, raw)?),
            Coercer::Bool => FieldValue::Bool(coerce::boolean(name, raw)?),
            Coercer::Timestamp => FieldValue::Timestamp(coerce::timestamp(name, raw)?),
            Coercer::OracleRef(policy) => {
                let oracle = coerce::oracle_ref(&self.store, name, raw, policy).await?;
                FieldValue::OptionalRef(oracle.map(|r| r.address()))
            }
            Coercer::EventRef => {
                let event = coerce::event_ref(&self.store, name, raw).await?;
                FieldValue::Address(event.address())
            }
            Coercer::EventDescription => FieldValue::Description(
                coerce::event_description(&self.store, &self.resolver, name, raw).await?,
            ),
        };
        Ok(value)
    }

    /// Record the outcome reported by an oracle contract.
    async fn assign_outcome(&self, event: &RawEvent) -> Result<RecordId, ReconciliationError> {
        reached(Stage::SchemaSelected);
        let address = coerce::address("address", &Value::String(event.address.clone()))?;
        let raw = event
            .param("outcome")
            .ok_or(ReconciliationError::MissingField("outcome"))?;
        let outcome = coerce::integer("outcome", raw)?;
        reached(Stage::FieldsCoerced);

        let oracle = self.store.find_oracle(&address).await?.ok_or(
            ReconciliationError::ReferenceNotFound {
                field: "address",
                kind: "oracle",
                address,
            },
        )?;
        reached(Stage::CrossReferencesResolved);

        let state = oracle.oracle_state().unwrap_or_default();
        if state.is_outcome_set {
            if state.outcome == outcome {
                info!("Skipping replayed outcome {} for oracle {}", outcome, address);
                return Ok(oracle.id());
            }
            return Err(ReconciliationError::OutcomeAlreadySet {
                address,
                current: state.outcome,
                requested: outcome,
            });
        }

        self.store.set_oracle_outcome(&address, outcome).await?;
        reached(Stage::Persisted);

        info!("Oracle {} outcome set to {}", address, outcome);
        Ok(oracle.id())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{DescriptorError, FetchError, FieldError, FieldReason};
    use crate::event::{BlockMeta, EventParam};
    use crate::ipfs::MockContentFetcher;
    use crate::models::{
        ContractMeta, DescriptionVariant, EventDescription, OracleState, Record, UltimateOracle,
    };
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    pub const FACTORY: &str = "0xf0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0";
    pub const CREATOR: &str = "0xc0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0";
    pub const TOKEN: &str = "0xe0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0";
    pub const CATEGORICAL_DESCRIPTOR: &[u8] =
        br#"{"title":"T","description":"D","resolutionDate":"2020-01-01","outcomes":["Yes","No"]}"#;

    pub fn addr(c: char) -> String {
        format!("0x{}", c.to_string().repeat(40))
    }

    pub fn raw(name: &str, emitter: &str, block: u64, params: Vec<EventParam>) -> RawEvent {
        RawEvent {
            address: emitter.to_string(),
            name: name.to_string(),
            block: BlockMeta {
                number: block,
                timestamp: 1_500_000_000 + block as i64,
            },
            params,
        }
    }

    pub fn centralized_oracle(oracle: &str, ipfs_hash: &str) -> RawEvent {
        raw(
            "CentralizedOracleFactory.CentralizedOracleCreation",
            FACTORY,
            1,
            vec![
                EventParam::new("creator", CREATOR),
                EventParam::new("centralizedOracle", oracle),
                EventParam::new("ipfsHash", ipfs_hash),
            ],
        )
    }

    pub fn ultimate_oracle(oracle: &str, forwarded: &str) -> RawEvent {
        raw(
            "UltimateOracleFactory.UltimateOracleCreation",
            FACTORY,
            2,
            vec![
                EventParam::new("creator", CREATOR),
                EventParam::new("ultimateOracle", oracle),
                EventParam::new("oracle", forwarded),
                EventParam::new("collateralToken", TOKEN),
                EventParam::new("spreadMultiplier", 3),
                EventParam::new("challengePeriod", 200),
                EventParam::new("challengeAmount", "100000000000000000000"),
                EventParam::new("frontRunnerPeriod", 50),
            ],
        )
    }

    pub fn categorical_event(event: &str, oracle: &str) -> RawEvent {
        raw(
            "EventFactory.CategoricalEventCreation",
            FACTORY,
            3,
            vec![
                EventParam::new("creator", CREATOR),
                EventParam::new("collateralToken", TOKEN),
                EventParam::new("oracle", oracle),
                EventParam::new("outcomeCount", 2),
                EventParam::new("categoricalEvent", event),
            ],
        )
    }

    pub fn scalar_event(event: &str, oracle: &str) -> RawEvent {
        raw(
            "EventFactory.ScalarEventCreation",
            FACTORY,
            3,
            vec![
                EventParam::new("scalarEvent", event),
                EventParam::new("creator", CREATOR),
                EventParam::new("collateralToken", TOKEN),
                EventParam::new("oracle", oracle),
                EventParam::new("lowerBound", -100),
                EventParam::new("upperBound", "100"),
            ],
        )
    }

    pub fn market(market: &str, event: &str) -> RawEvent {
        raw(
            "StandardMarketFactory.StandardMarketCreation",
            FACTORY,
            4,
            vec![
                EventParam::new("creator", CREATOR),
                EventParam::new("market", market),
                EventParam::new("eventContract", event),
                EventParam::new("marketMaker", TOKEN),
                EventParam::new("fee", 25),
            ],
        )
    }

    pub fn outcome_token(event: &str, token: &str, index: i64) -> RawEvent {
        raw(
            "OutcomeTokenCreation",
            event,
            3,
            vec![
                EventParam::new("outcomeToken", token),
                EventParam::new("index", index),
            ],
        )
    }

    fn engine_with(
        fetcher: MockContentFetcher,
    ) -> ReconciliationEngine<MemoryStore, MockContentFetcher> {
        ReconciliationEngine::new(MemoryStore::new(), fetcher)
    }

    fn no_fetch() -> MockContentFetcher {
        let mut mock = MockContentFetcher::new();
        mock.expect_get().never();
        mock
    }

    fn categorical_fetcher() -> MockContentFetcher {
        let mut mock = MockContentFetcher::new();
        mock.expect_get()
            .withf(|hash| hash == "Qm123")
            .times(1)
            .returning(|_| Ok(CATEGORICAL_DESCRIPTOR.to_vec()));
        mock
    }

    fn parse(a: &str) -> Address {
        a.parse().unwrap()
    }

    #[tokio::test]
    async fn test_centralized_oracle_with_categorical_description() {
        let engine = engine_with(categorical_fetcher());
        let oracle = addr('1');

        let id = engine.apply(&centralized_oracle(&oracle, "Qm123")).await.unwrap();
        assert_eq!(id.kind, RecordKind::CentralizedOracle);

        let description = engine.store().get_description("Qm123").await.unwrap().unwrap();
        assert_eq!(
            description.variant,
            DescriptionVariant::Categorical {
                outcomes: vec!["Yes".to_string(), "No".to_string()]
            }
        );

        match engine.store().find_oracle(&parse(&oracle)).await.unwrap() {
            Some(Record::CentralizedOracle(o)) => {
                assert_eq!(o.event_description, "Qm123");
                assert_eq!(o.owner, parse(CREATOR));
                assert_eq!(o.meta.factory, parse(FACTORY));
                assert_eq!(o.meta.creation_block, 1);
                assert_eq!(o.meta.creation_date_time.timestamp(), 1_500_000_001);
                assert!(!o.state.is_outcome_set);
            }
            other => panic!("Expected centralized oracle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replayed_creation_is_noop() {
        // Fetcher expects exactly one call: the replay must not refetch.
        let engine = engine_with(categorical_fetcher());
        let event = centralized_oracle(&addr('1'), "Qm123");

        let first = engine.apply(&event).await.unwrap();
        let stored = engine.store().find_oracle(&first.address).await.unwrap();
        let second = engine.apply(&event).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.store().find_oracle(&first.address).await.unwrap(), stored);
        assert_eq!(engine.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_replay_is_noop_for_every_variant() {
        let engine = engine_with(categorical_fetcher());
        let events = vec![
            ultimate_oracle(&addr('2'), &addr('9')),
            centralized_oracle(&addr('1'), "Qm123"),
            scalar_event(&addr('3'), &addr('2')),
            categorical_event(&addr('4'), &addr('1')),
            market(&addr('5'), &addr('4')),
            outcome_token(&addr('4'), &addr('a'), 0),
        ];

        let mut ids = Vec::new();
        for event in &events {
            ids.push(engine.apply(event).await.unwrap());
        }
        let kinds: Vec<_> = ids.iter().map(|id| id.kind).collect();
        assert_eq!(kinds.len(), RecordKind::ALL.len());
        for kind in RecordKind::ALL {
            assert!(kinds.contains(&kind), "{} not created", kind);
        }

        let mut before = Vec::new();
        for id in &ids {
            before.push(engine.store().get(id.kind, &id.address).await.unwrap());
        }

        for (event, id) in events.iter().zip(&ids) {
            assert_eq!(engine.apply(event).await.unwrap(), *id);
        }
        for (id, stored) in ids.iter().zip(before) {
            assert_eq!(engine.store().get(id.kind, &id.address).await.unwrap(), stored);
        }
        assert_eq!(engine.store().len().await, 6);
    }

    /// Store where a rival writer claims the address between the engine's
    /// existence check and its insert.
    struct RacingStore {
        inner: MemoryStore,
        rival: Mutex<Option<Record>>,
    }

    impl RacingStore {
        fn new(rival: Record) -> Self {
            Self {
                inner: MemoryStore::new(),
                rival: Mutex::new(Some(rival)),
            }
        }
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        async fn find_kind(&self, address: &Address) -> Result<Option<RecordKind>, StoreError> {
            self.inner.find_kind(address).await
        }

        async fn get(
            &self,
            kind: RecordKind,
            address: &Address,
        ) -> Result<Option<Record>, StoreError> {
            self.inner.get(kind, address).await
        }

        async fn put(&self, record: &Record) -> Result<RecordId, StoreError> {
            if let Some(rival) = self.rival.lock().await.take() {
                self.inner.put(&rival).await?;
                return Err(StoreError::DuplicateKey(format!(
                    "address {}",
                    rival.address()
                )));
            }
            self.inner.put(record).await
        }

        async fn get_description(
            &self,
            ipfs_hash: &str,
        ) -> Result<Option<EventDescription>, StoreError> {
            self.inner.get_description(ipfs_hash).await
        }

        async fn put_description(&self, description: &EventDescription) -> Result<(), StoreError> {
            self.inner.put_description(description).await
        }

        async fn set_oracle_outcome(
            &self,
            address: &Address,
            outcome: i64,
        ) -> Result<(), StoreError> {
            self.inner.set_oracle_outcome(address, outcome).await
        }

        async fn load_cursor(&self) -> Result<Option<u64>, StoreError> {
            self.inner.load_cursor().await
        }

        async fn save_cursor(&self, block: u64) -> Result<(), StoreError> {
            self.inner.save_cursor(block).await
        }
    }

    fn ultimate_record(address: &str) -> Record {
        Record::UltimateOracle(UltimateOracle {
            meta: ContractMeta {
                address: parse(address),
                factory: parse(FACTORY),
                creator: parse(CREATOR),
                creation_block: 2,
                creation_date_time: Utc.timestamp_opt(1_500_000_002, 0).unwrap(),
            },
            forwarded_oracle: None,
            collateral_token: parse(TOKEN),
            spread_multiplier: dec!(3),
            challenge_period: 200,
            challenge_amount: dec!(100000000000000000000),
            front_runner_period: 50,
            state: OracleState::default(),
        })
    }

    #[tokio::test]
    async fn test_concurrent_same_variant_create_is_replay() {
        let store = RacingStore::new(ultimate_record(&addr('2')));
        let engine = ReconciliationEngine::new(store, no_fetch());

        let id = engine
            .apply(&ultimate_oracle(&addr('2'), &addr('9')))
            .await
            .unwrap();

        assert_eq!(id.kind, RecordKind::UltimateOracle);
        assert_eq!(id.address, parse(&addr('2')));
        assert_eq!(engine.store().inner.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_other_variant_create_conflicts() {
        let store = RacingStore::new(ultimate_record(&addr('4')));
        store.inner.put(&ultimate_record(&addr('2'))).await.unwrap();
        let engine = ReconciliationEngine::new(store, no_fetch());

        let err = engine
            .apply(&categorical_event(&addr('4'), &addr('2')))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconciliationError::AddressVariantConflict {
                existing: RecordKind::UltimateOracle,
                requested: RecordKind::CategoricalEvent,
                ..
            }
        ));
        assert_eq!(engine.store().inner.len().await, 2);
    }

    #[tokio::test]
    async fn test_ultimate_oracle_with_unknown_forwarded_oracle() {
        let engine = engine_with(no_fetch());
        let id = engine
            .apply(&ultimate_oracle(&addr('2'), &addr('9')))
            .await
            .unwrap();

        match engine.store().get(id.kind, &id.address).await.unwrap() {
            Some(Record::UltimateOracle(o)) => {
                assert_eq!(o.forwarded_oracle, None);
                assert_eq!(o.challenge_amount, dec!(100000000000000000000));
                assert_eq!(o.spread_multiplier, dec!(3));
                assert_eq!(o.front_runner_period, 50);
            }
            other => panic!("Expected ultimate oracle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ultimate_oracle_links_known_forwarded_oracle() {
        let engine = engine_with(no_fetch());
        engine
            .apply(&ultimate_oracle(&addr('2'), &addr('9')))
            .await
            .unwrap();
        let id = engine
            .apply(&ultimate_oracle(&addr('3'), &addr('2')))
            .await
            .unwrap();

        match engine.store().get(id.kind, &id.address).await.unwrap() {
            Some(Record::UltimateOracle(o)) => assert_eq!(o.forwarded_oracle, Some(parse(&addr('2')))),
            other => panic!("Expected ultimate oracle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_event_requires_known_oracle_then_succeeds_on_retry() {
        let engine = engine_with(no_fetch());
        let event = categorical_event(&addr('4'), &addr('2'));

        let err = engine.apply(&event).await.unwrap_err();
        assert!(err.is_reference_not_found());
        assert!(engine.store().is_empty().await);

        engine
            .apply(&ultimate_oracle(&addr('2'), &addr('9')))
            .await
            .unwrap();
        let id = engine.apply(&event).await.unwrap();
        assert_eq!(id.kind, RecordKind::CategoricalEvent);
    }

    #[tokio::test]
    async fn test_full_chain_oracle_event_market_tokens() {
        let engine = engine_with(no_fetch());
        engine
            .apply(&ultimate_oracle(&addr('2'), &addr('9')))
            .await
            .unwrap();
        engine.apply(&scalar_event(&addr('4'), &addr('2'))).await.unwrap();
        engine.apply(&outcome_token(&addr('4'), &addr('a'), 0)).await.unwrap();
        engine.apply(&outcome_token(&addr('4'), &addr('b'), 1)).await.unwrap();
        let id = engine.apply(&market(&addr('5'), &addr('4'))).await.unwrap();

        match engine.store().get(id.kind, &id.address).await.unwrap() {
            Some(Record::Market(m)) => {
                assert_eq!(m.event, parse(&addr('4')));
                assert_eq!(m.fee, dec!(25));
                assert_eq!(m.revenue, dec!(0));
                assert_eq!(m.collected_fees, dec!(0));
            }
            other => panic!("Expected market, got {:?}", other),
        }

        match engine.store().get(RecordKind::ScalarEvent, &parse(&addr('4'))).await.unwrap() {
            Some(Record::ScalarEvent(e)) => {
                assert_eq!(e.lower_bound, dec!(-100));
                assert_eq!(e.upper_bound, dec!(100));
            }
            other => panic!("Expected scalar event, got {:?}", other),
        }
        assert_eq!(engine.store().len().await, 5);
    }

    #[tokio::test]
    async fn test_market_requires_known_event() {
        let engine = engine_with(no_fetch());
        let err = engine.apply(&market(&addr('5'), &addr('4'))).await.unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::ReferenceNotFound { kind: "event", .. }
        ));
    }

    #[tokio::test]
    async fn test_outcome_token_requires_known_event() {
        let engine = engine_with(no_fetch());
        let err = engine
            .apply(&outcome_token(&addr('4'), &addr('a'), 0))
            .await
            .unwrap_err();
        assert!(err.is_reference_not_found());
    }

    #[tokio::test]
    async fn test_outcome_token_rejects_negative_index() {
        let engine = engine_with(no_fetch());
        let err = engine
            .apply(&outcome_token(&addr('4'), &addr('a'), -1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::Field(FieldError {
                reason: FieldReason::Negative,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_address_variant_conflict() {
        let engine = engine_with(no_fetch());
        engine
            .apply(&ultimate_oracle(&addr('2'), &addr('9')))
            .await
            .unwrap();
        // Same address now announced as a categorical event.
        let err = engine
            .apply(&categorical_event(&addr('2'), &addr('2')))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconciliationError::AddressVariantConflict {
                existing: RecordKind::UltimateOracle,
                requested: RecordKind::CategoricalEvent,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_address_lengths() {
        let engine = engine_with(no_fetch());
        for len in [39, 41] {
            let oracle = format!("0x{}", "2".repeat(len));
            let err = engine
                .apply(&ultimate_oracle(&oracle, &addr('9')))
                .await
                .unwrap_err();
            match err {
                ReconciliationError::Field(e) => {
                    assert_eq!(e.field, "ultimateOracle");
                    assert_eq!(e.reason, FieldReason::InvalidAddressLength { len });
                }
                other => panic!("Expected field error, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let engine = engine_with(no_fetch());
        let mut event = market(&addr('5'), &addr('4'));
        event.params.retain(|p| p.name != "fee");

        let err = engine.apply(&event).await.unwrap_err();
        assert!(matches!(err, ReconciliationError::MissingField("fee")));
    }

    #[tokio::test]
    async fn test_unknown_parameters_ignored_and_order_independent() {
        let engine = engine_with(no_fetch());
        let mut event = ultimate_oracle(&addr('2'), &addr('9'));
        event.params.reverse();
        event.params.push(EventParam::new("somethingElse", "x"));

        assert!(engine.apply(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_event_name() {
        let engine = engine_with(no_fetch());
        let err = engine
            .apply(&raw("Token.Transfer", FACTORY, 1, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::UnknownEvent(_)));
    }

    #[tokio::test]
    async fn test_ambiguous_descriptor_rejects_oracle() {
        let mut mock = MockContentFetcher::new();
        mock.expect_get().returning(|_| {
            Ok(br#"{"title":"T","description":"D","resolutionDate":"2020-01-01","unit":"U","decimals":2,"outcomes":["A"]}"#.to_vec())
        });
        let engine = engine_with(mock);

        let err = engine
            .apply(&centralized_oracle(&addr('1'), "QmBoth"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconciliationError::Descriptor {
                source: DescriptorError::AmbiguousDescriptor,
                ..
            }
        ));
        assert!(engine.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_content_unavailable_writes_nothing() {
        let mut mock = MockContentFetcher::new();
        mock.expect_get()
            .returning(|hash| Err(FetchError::NotFound(hash.to_string())));
        let engine = engine_with(mock);

        let err = engine
            .apply(&centralized_oracle(&addr('1'), "QmGone"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconciliationError::ContentUnavailable { .. }));
        assert!(engine.store().is_empty().await);
        assert_eq!(engine.store().description_count().await, 0);
    }

    #[tokio::test]
    async fn test_shared_description_fetched_once() {
        let engine = engine_with(categorical_fetcher());
        engine.apply(&centralized_oracle(&addr('1'), "Qm123")).await.unwrap();
        engine.apply(&centralized_oracle(&addr('2'), "Qm123")).await.unwrap();

        assert_eq!(engine.store().len().await, 2);
        assert_eq!(engine.store().description_count().await, 1);
    }

    #[tokio::test]
    async fn test_outcome_assignment() {
        let engine = engine_with(no_fetch());
        engine
            .apply(&ultimate_oracle(&addr('2'), &addr('9')))
            .await
            .unwrap();

        let assign = |outcome: i64| {
            raw(
                "UltimateOracle.OutcomeAssignment",
                &addr('2'),
                9,
                vec![EventParam::new("outcome", outcome)],
            )
        };

        engine.apply(&assign(1)).await.unwrap();
        let oracle = engine.store().find_oracle(&parse(&addr('2'))).await.unwrap().unwrap();
        let state = oracle.oracle_state().unwrap();
        assert!(state.is_outcome_set);
        assert_eq!(state.outcome, 1);

        // Replay is a no-op, a different outcome is rejected.
        engine.apply(&assign(1)).await.unwrap();
        let err = engine.apply(&assign(0)).await.unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::OutcomeAlreadySet {
                current: 1,
                requested: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_outcome_assignment_unknown_oracle() {
        let engine = engine_with(no_fetch());
        let event = raw(
            "OutcomeAssignment",
            &addr('7'),
            9,
            vec![EventParam::new("outcome", 1)],
        );
        assert!(engine.apply(&event).await.unwrap_err().is_reference_not_found());
    }
}
