//! Declarative record schemas.
//!
//! Each creation event maps to one [`RecordKind`]. A schema is the ordered
//! list of [`FieldSpec`]s for that kind, assembled from shared field groups
//! when the registry is built. Coercion fills a [`Fields`] map which is then
//! turned into the typed [`Record`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::coerce::RefPolicy;
use crate::error::ReconciliationError;
use crate::event::RawEvent;
use crate::models::{
    Address, CategoricalEvent, CentralizedOracle, ContractMeta, EventDescription, Market,
    OracleState, OutcomeToken, Record, RecordKind, ScalarEvent, UltimateOracle,
};

/// Where a field's raw value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Named event parameter.
    Param(&'static str),
    /// Address of the contract that emitted the event.
    Emitter,
    BlockNumber,
    BlockTimestamp,
}

/// Which coercer turns the raw value into a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercer {
    Address,
    Integer,
    Unsigned,
    Amount,
    Bool,
    Timestamp,
    OracleRef(RefPolicy),
    EventRef,
    EventDescription,
}

/// Coercion stage a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Plain,
    Reference,
    Content,
}

impl Coercer {
    pub fn phase(&self) -> Phase {
        match self {
            Coercer::OracleRef(_) | Coercer::EventRef => Phase::Reference,
            Coercer::EventDescription => Phase::Content,
            _ => Phase::Plain,
        }
    }
}

/// Value used when an optional parameter is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    False,
    Zero,
}

impl FieldDefault {
    fn value(&self, coercer: Coercer) -> FieldValue {
        match (self, coercer) {
            (FieldDefault::False, _) => FieldValue::Bool(false),
            (FieldDefault::Zero, Coercer::Amount) => FieldValue::Amount(Decimal::ZERO),
            (FieldDefault::Zero, _) => FieldValue::Int(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: &'static str,
    pub source: Source,
    pub coercer: Coercer,
    pub required: bool,
    pub default: Option<FieldDefault>,
}

const fn param(field: &'static str, name: &'static str, coercer: Coercer) -> FieldSpec {
    FieldSpec {
        field,
        source: Source::Param(name),
        coercer,
        required: true,
        default: None,
    }
}

const fn defaulted(
    field: &'static str,
    name: &'static str,
    coercer: Coercer,
    default: FieldDefault,
) -> FieldSpec {
    FieldSpec {
        field,
        source: Source::Param(name),
        coercer,
        required: false,
        default: Some(default),
    }
}

const fn derived(field: &'static str, source: Source, coercer: Coercer) -> FieldSpec {
    FieldSpec {
        field,
        source,
        coercer,
        required: true,
        default: None,
    }
}

const FACTORY_CREATED: &[FieldSpec] = &[
    derived("factory", Source::Emitter, Coercer::Address),
    param("creator", "creator", Coercer::Address),
    derived("creation_block", Source::BlockNumber, Coercer::Integer),
    derived("creation_date_time", Source::BlockTimestamp, Coercer::Timestamp),
];

const ORACLE_STATE: &[FieldSpec] = &[
    defaulted("is_outcome_set", "isOutcomeSet", Coercer::Bool, FieldDefault::False),
    defaulted("outcome", "outcome", Coercer::Integer, FieldDefault::Zero),
];

const EVENT_BASE: &[FieldSpec] = &[
    param("collateral_token", "collateralToken", Coercer::Address),
    param("oracle", "oracle", Coercer::OracleRef(RefPolicy::Required)),
];

const CENTRALIZED_ORACLE: &[FieldSpec] = &[
    param("owner", "creator", Coercer::Address),
    param("event_description", "ipfsHash", Coercer::EventDescription),
];

const ULTIMATE_ORACLE: &[FieldSpec] = &[
    param("forwarded_oracle", "oracle", Coercer::OracleRef(RefPolicy::Optional)),
    param("collateral_token", "collateralToken", Coercer::Address),
    param("spread_multiplier", "spreadMultiplier", Coercer::Amount),
    param("challenge_period", "challengePeriod", Coercer::Unsigned),
    param("challenge_amount", "challengeAmount", Coercer::Amount),
    param("front_runner_period", "frontRunnerPeriod", Coercer::Unsigned),
];

const SCALAR_EVENT: &[FieldSpec] = &[
    param("lower_bound", "lowerBound", Coercer::Amount),
    param("upper_bound", "upperBound", Coercer::Amount),
];

const CATEGORICAL_EVENT: &[FieldSpec] = &[defaulted(
    "outcome_count",
    "outcomeCount",
    Coercer::Unsigned,
    FieldDefault::Zero,
)];

const MARKET: &[FieldSpec] = &[
    param("event", "eventContract", Coercer::EventRef),
    param("market_maker", "marketMaker", Coercer::Address),
    param("fee", "fee", Coercer::Amount),
    defaulted("revenue", "revenue", Coercer::Amount, FieldDefault::Zero),
    defaulted("collected_fees", "collectedFees", Coercer::Amount, FieldDefault::Zero),
];

const OUTCOME_TOKEN: &[FieldSpec] = &[
    derived("event", Source::Emitter, Coercer::EventRef),
    param("index", "index", Coercer::Unsigned),
];

/// Field table for one record variant.
#[derive(Debug, Clone)]
pub struct Schema {
    pub kind: RecordKind,
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    fn compose(kind: RecordKind, address_param: &'static str, groups: &[&[FieldSpec]]) -> Self {
        let mut fields = vec![param("address", address_param, Coercer::Address)];
        for group in groups {
            fields.extend_from_slice(group);
        }
        Self { kind, fields }
    }

    /// Fields of one phase, in declaration order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(move |spec| spec.coercer.phase() == phase)
    }
}

/// What an incoming event does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Creates a contract record of the given variant.
    Create(RecordKind),
    /// Sets the outcome on an existing oracle.
    OutcomeAssignment,
}

impl EventKind {
    /// Select by unqualified event name (see [`RawEvent::short_name`]).
    pub fn from_event_name(name: &str) -> Option<Self> {
        let kind = match name {
            "CentralizedOracleCreation" => EventKind::Create(RecordKind::CentralizedOracle),
            "UltimateOracleCreation" => EventKind::Create(RecordKind::UltimateOracle),
            "ScalarEventCreation" => EventKind::Create(RecordKind::ScalarEvent),
            "CategoricalEventCreation" => EventKind::Create(RecordKind::CategoricalEvent),
            "StandardMarketCreation" => EventKind::Create(RecordKind::Market),
            "OutcomeTokenCreation" => EventKind::Create(RecordKind::OutcomeToken),
            "OutcomeAssignment" => EventKind::OutcomeAssignment,
            _ => return None,
        };
        Some(kind)
    }
}

/// Schemas for every record variant, built once at startup.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<RecordKind, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        let schemas = [
            Schema::compose(
                RecordKind::CentralizedOracle,
                "centralizedOracle",
                &[FACTORY_CREATED, ORACLE_STATE, CENTRALIZED_ORACLE],
            ),
            Schema::compose(
                RecordKind::UltimateOracle,
                "ultimateOracle",
                &[FACTORY_CREATED, ORACLE_STATE, ULTIMATE_ORACLE],
            ),
            Schema::compose(
                RecordKind::ScalarEvent,
                "scalarEvent",
                &[FACTORY_CREATED, EVENT_BASE, SCALAR_EVENT],
            ),
            Schema::compose(
                RecordKind::CategoricalEvent,
                "categoricalEvent",
                &[FACTORY_CREATED, EVENT_BASE, CATEGORICAL_EVENT],
            ),
            Schema::compose(RecordKind::Market, "market", &[FACTORY_CREATED, MARKET]),
            Schema::compose(RecordKind::OutcomeToken, "outcomeToken", &[OUTCOME_TOKEN]),
        ];

        Self {
            schemas: schemas.into_iter().map(|s| (s.kind, s)).collect(),
        }
    }

    pub fn get(&self, kind: RecordKind) -> Option<&Schema> {
        self.schemas.get(&kind)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw value for a field, or `None` when an optional parameter is absent.
pub fn raw_value(
    event: &RawEvent,
    spec: &FieldSpec,
) -> Result<Option<Value>, ReconciliationError> {
    let value = match spec.source {
        Source::Param(name) => match event.param(name) {
            Some(v) => v.clone(),
            None if spec.required => return Err(ReconciliationError::MissingField(name)),
            None => return Ok(None),
        },
        Source::Emitter => Value::String(event.address.clone()),
        Source::BlockNumber => Value::from(event.block.number),
        Source::BlockTimestamp => Value::from(event.block.timestamp),
    };
    Ok(Some(value))
}

/// A coerced field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Address(Address),
    OptionalRef(Option<Address>),
    Int(i64),
    Amount(Decimal),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Description(EventDescription),
}

/// Coerced values keyed by field name.
#[derive(Debug, Default, Clone)]
pub struct Fields {
    values: HashMap<&'static str, FieldValue>,
}

impl Fields {
    pub fn insert(&mut self, field: &'static str, value: FieldValue) {
        self.values.insert(field, value);
    }

    pub fn insert_default(&mut self, spec: &FieldSpec) {
        if let Some(default) = spec.default {
            self.values.insert(spec.field, default.value(spec.coercer));
        }
    }

    fn take(&mut self, field: &'static str) -> Result<FieldValue, ReconciliationError> {
        self.values
            .remove(field)
            .ok_or(ReconciliationError::MissingField(field))
    }

    pub fn address(&self, field: &'static str) -> Result<Address, ReconciliationError> {
        match self.values.get(field) {
            Some(FieldValue::Address(a)) => Ok(*a),
            _ => Err(ReconciliationError::MissingField(field)),
        }
    }

    fn optional_ref(
        &mut self,
        field: &'static str,
    ) -> Result<Option<Address>, ReconciliationError> {
        match self.take(field)? {
            FieldValue::OptionalRef(a) => Ok(a),
            FieldValue::Address(a) => Ok(Some(a)),
            _ => Err(ReconciliationError::MissingField(field)),
        }
    }

    fn reference(&mut self, field: &'static str) -> Result<Address, ReconciliationError> {
        self.optional_ref(field)?
            .ok_or(ReconciliationError::MissingField(field))
    }

    fn int(&mut self, field: &'static str) -> Result<i64, ReconciliationError> {
        match self.take(field)? {
            FieldValue::Int(v) => Ok(v),
            _ => Err(ReconciliationError::MissingField(field)),
        }
    }

    fn amount(&mut self, field: &'static str) -> Result<Decimal, ReconciliationError> {
        match self.take(field)? {
            FieldValue::Amount(v) => Ok(v),
            _ => Err(ReconciliationError::MissingField(field)),
        }
    }

    fn boolean(&mut self, field: &'static str) -> Result<bool, ReconciliationError> {
        match self.take(field)? {
            FieldValue::Bool(v) => Ok(v),
            _ => Err(ReconciliationError::MissingField(field)),
        }
    }

    fn timestamp(&mut self, field: &'static str) -> Result<DateTime<Utc>, ReconciliationError> {
        match self.take(field)? {
            FieldValue::Timestamp(v) => Ok(v),
            _ => Err(ReconciliationError::MissingField(field)),
        }
    }

    fn description_hash(&mut self, field: &'static str) -> Result<String, ReconciliationError> {
        match self.take(field)? {
            FieldValue::Description(d) => Ok(d.ipfs_hash),
            _ => Err(ReconciliationError::MissingField(field)),
        }
    }

    fn meta(&mut self) -> Result<ContractMeta, ReconciliationError> {
        Ok(ContractMeta {
            address: self.address("address")?,
            factory: self.address("factory")?,
            creator: self.address("creator")?,
            creation_block: self.int("creation_block")?,
            creation_date_time: self.timestamp("creation_date_time")?,
        })
    }

    fn oracle_state(&mut self) -> Result<OracleState, ReconciliationError> {
        Ok(OracleState {
            is_outcome_set: self.boolean("is_outcome_set")?,
            outcome: self.int("outcome")?,
        })
    }

    /// Assemble the typed record for `kind`.
    pub fn into_record(mut self, kind: RecordKind) -> Result<Record, ReconciliationError> {
        let record = match kind {
            RecordKind::CentralizedOracle => Record::CentralizedOracle(CentralizedOracle {
                meta: self.meta()?,
                owner: self.address("owner")?,
                event_description: self.description_hash("event_description")?,
                state: self.oracle_state()?,
            }),
            RecordKind::UltimateOracle => Record::UltimateOracle(UltimateOracle {
                meta: self.meta()?,
                forwarded_oracle: self.optional_ref("forwarded_oracle")?,
                collateral_token: self.address("collateral_token")?,
                spread_multiplier: self.amount("spread_multiplier")?,
                challenge_period: self.int("challenge_period")?,
                challenge_amount: self.amount("challenge_amount")?,
                front_runner_period: self.int("front_runner_period")?,
                state: self.oracle_state()?,
            }),
            RecordKind::ScalarEvent => Record::ScalarEvent(ScalarEvent {
                meta: self.meta()?,
                collateral_token: self.address("collateral_token")?,
                oracle: self.reference("oracle")?,
                lower_bound: self.amount("lower_bound")?,
                upper_bound: self.amount("upper_bound")?,
            }),
            RecordKind::CategoricalEvent => Record::CategoricalEvent(CategoricalEvent {
                meta: self.meta()?,
                collateral_token: self.address("collateral_token")?,
                oracle: self.reference("oracle")?,
                outcome_count: self.int("outcome_count")?,
            }),
            RecordKind::Market => Record::Market(Market {
                meta: self.meta()?,
                event: self.reference("event")?,
                market_maker: self.address("market_maker")?,
                fee: self.amount("fee")?,
                revenue: self.amount("revenue")?,
                collected_fees: self.amount("collected_fees")?,
            }),
            RecordKind::OutcomeToken => Record::OutcomeToken(OutcomeToken {
                address: self.address("address")?,
                event: self.reference("event")?,
                index: self.int("index")?,
            }),
        };
        Ok(record)
    }
}
