//! Keyed record store abstraction.
//!
//! The engine only needs atomic per-record creation, lookups by address and
//! content hash, and foreign-key integrity. [`crate::repository::PgStore`] is
//! the PostgreSQL implementation; [`MemoryStore`] backs dry runs and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Address, EventDescription, Record, RecordId, RecordKind};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Variant of the contract record stored under `address`, if any.
    async fn find_kind(&self, address: &Address) -> Result<Option<RecordKind>, StoreError>;

    async fn get(&self, kind: RecordKind, address: &Address)
        -> Result<Option<Record>, StoreError>;

    /// Atomically create a record. Fails with `DuplicateKey` if the address
    /// (or an outcome token's event/index pair) is taken.
    async fn put(&self, record: &Record) -> Result<RecordId, StoreError>;

    async fn get_description(&self, ipfs_hash: &str)
        -> Result<Option<EventDescription>, StoreError>;

    /// Store a description. A populated description already stored under the
    /// same hash is kept as is.
    async fn put_description(&self, description: &EventDescription) -> Result<(), StoreError>;

    async fn set_oracle_outcome(&self, address: &Address, outcome: i64) -> Result<(), StoreError>;

    /// Last fully processed block.
    async fn load_cursor(&self) -> Result<Option<u64>, StoreError>;

    async fn save_cursor(&self, block: u64) -> Result<(), StoreError>;

    async fn find_oracle(&self, address: &Address) -> Result<Option<Record>, StoreError> {
        match self.find_kind(address).await? {
            Some(kind) if kind.is_oracle() => self.get(kind, address).await,
            _ => Ok(None),
        }
    }

    async fn find_event(&self, address: &Address) -> Result<Option<Record>, StoreError> {
        match self.find_kind(address).await? {
            Some(kind) if kind.is_event() => self.get(kind, address).await,
            _ => Ok(None),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<Address, Record>,
    token_slots: HashSet<(Address, i64)>,
    descriptions: HashMap<String, EventDescription>,
    cursor: Option<u64>,
}

/// In-process record store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn description_count(&self) -> usize {
        self.state.read().await.descriptions.len()
    }
}

impl MemoryState {
    fn require(&self, address: &Address, ok: fn(RecordKind) -> bool, what: &str) -> Result<(), StoreError> {
        match self.records.get(address) {
            Some(r) if ok(r.kind()) => Ok(()),
            _ => Err(StoreError::ForeignKey(format!("{} {} does not exist", what, address))),
        }
    }

    fn check_references(&self, record: &Record) -> Result<(), StoreError> {
        match record {
            Record::CentralizedOracle(r) => {
                if self.descriptions.contains_key(&r.event_description) {
                    Ok(())
                } else {
                    Err(StoreError::ForeignKey(format!(
                        "event description {} does not exist",
                        r.event_description
                    )))
                }
            }
            Record::UltimateOracle(r) => match &r.forwarded_oracle {
                Some(oracle) => self.require(oracle, |k| k.is_oracle(), "oracle"),
                None => Ok(()),
            },
            Record::ScalarEvent(r) => self.require(&r.oracle, |k| k.is_oracle(), "oracle"),
            Record::CategoricalEvent(r) => self.require(&r.oracle, |k| k.is_oracle(), "oracle"),
            Record::Market(r) => self.require(&r.event, |k| k.is_event(), "event"),
            Record::OutcomeToken(r) => self.require(&r.event, |k| k.is_event(), "event"),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_kind(&self, address: &Address) -> Result<Option<RecordKind>, StoreError> {
        Ok(self.state.read().await.records.get(address).map(Record::kind))
    }

    async fn get(
        &self,
        kind: RecordKind,
        address: &Address,
    ) -> Result<Option<Record>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(address)
            .filter(|r| r.kind() == kind)
            .cloned())
    }

    async fn put(&self, record: &Record) -> Result<RecordId, StoreError> {
        let mut state = self.state.write().await;
        let address = record.address();

        if state.records.contains_key(&address) {
            return Err(StoreError::DuplicateKey(format!("address {}", address)));
        }
        state.check_references(record)?;

        if let Record::OutcomeToken(token) = record {
            if !state.token_slots.insert((token.event, token.index)) {
                return Err(StoreError::DuplicateKey(format!(
                    "outcome token {} index {}",
                    token.event, token.index
                )));
            }
        }

        state.records.insert(address, record.clone());
        Ok(record.id())
    }

    async fn get_description(
        &self,
        ipfs_hash: &str,
    ) -> Result<Option<EventDescription>, StoreError> {
        Ok(self.state.read().await.descriptions.get(ipfs_hash).cloned())
    }

    async fn put_description(&self, description: &EventDescription) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let keep_existing = state
            .descriptions
            .get(&description.ipfs_hash)
            .is_some_and(EventDescription::is_populated);
        if !keep_existing {
            state
                .descriptions
                .insert(description.ipfs_hash.clone(), description.clone());
        }
        Ok(())
    }

    async fn set_oracle_outcome(&self, address: &Address, outcome: i64) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let oracle_state = state
            .records
            .get_mut(address)
            .and_then(Record::oracle_state_mut)
            .ok_or_else(|| StoreError::ForeignKey(format!("oracle {} does not exist", address)))?;
        oracle_state.is_outcome_set = true;
        oracle_state.outcome = outcome;
        Ok(())
    }

    async fn load_cursor(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.state.read().await.cursor)
    }

    async fn save_cursor(&self, block: u64) -> Result<(), StoreError> {
        self.state.write().await.cursor = Some(block);
        Ok(())
    }
}
