//! Reconciliation of prediction-market contract events into typed records.
//!
//! Provides:
//! - Declarative per-event field schemas and value coercion
//! - IPFS event description fetching and variant disambiguation
//! - Idempotent record creation through the reconciliation engine
//! - Block processing with in-block reference deferral and a persistent cursor
//! - PostgreSQL and in-memory record stores

pub mod coerce;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod event;
pub mod indexer;
pub mod ipfs;
pub mod models;
pub mod repository;
pub mod schema;
pub mod store;

pub use config::Config;
pub use db::Database;
pub use engine::ReconciliationEngine;
pub use error::{Disposition, ReconciliationError, StoreError};
pub use event::{BlockBatch, RawEvent};
pub use indexer::{BlockError, BlockProcessor, BlockReport};
pub use ipfs::{ContentFetcher, ContentResolver, IpfsGateway};
pub use models::{Address, EventDescription, Record, RecordId, RecordKind};
pub use repository::PgStore;
pub use store::{MemoryStore, RecordStore};
