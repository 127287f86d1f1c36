//! Error taxonomy for event reconciliation.
//!
//! Every failure is classified by [`ReconciliationError::disposition`] so the
//! block processor can decide whether to drop the event, replay the block, or
//! stop and surface the problem to an operator.

use thiserror::Error;

use crate::models::{Address, RecordKind};

/// Why a single raw parameter could not be coerced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldReason {
    #[error("address must have exactly 40 hex characters, got {len}")]
    InvalidAddressLength { len: usize },

    #[error("address contains non-hex characters")]
    InvalidHex,

    #[error("expected an integer")]
    NotAnInteger,

    #[error("value must not be negative")]
    Negative,

    #[error("integer out of range")]
    OutOfRange,

    #[error("expected a boolean")]
    NotABoolean,

    #[error("expected a string")]
    NotAString,
}

/// Bad shape or length of a raw value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field `{field}`: {reason}")]
pub struct FieldError {
    pub field: String,
    pub reason: FieldReason,
}

impl FieldError {
    pub fn new(field: &str, reason: FieldReason) -> Self {
        Self {
            field: field.to_string(),
            reason,
        }
    }
}

/// Malformed event description content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor is missing required field `{field}`")]
    MissingDescriptorField { field: &'static str },

    #[error("descriptor must be scalar or categorical, not both")]
    AmbiguousDescriptor,

    #[error("scalar descriptor must have both unit and decimals")]
    IncompleteScalarDescriptor,

    #[error("descriptor must be scalar (unit, decimals) or categorical (outcomes)")]
    UnknownDescriptorVariant,

    #[error("descriptor field `{field}` is invalid: {reason}")]
    InvalidDescriptorField { field: &'static str, reason: String },
}

/// Failure of the content-addressed fetch client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("content {0} not found")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// Failure of the external content resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("content {hash} unavailable: {source}")]
    Unavailable { hash: String, source: FetchError },

    #[error("content {hash} is not a JSON object: {reason}")]
    Malformed { hash: String, reason: String },
}

/// Record store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Failure to turn one raw event into a persisted record.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    #[error("missing required parameter `{0}`")]
    MissingField(&'static str),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("{kind} {address} referenced by `{field}` not found")]
    ReferenceNotFound {
        field: &'static str,
        kind: &'static str,
        address: Address,
    },

    #[error("content {hash} unavailable: {reason}")]
    ContentUnavailable { hash: String, reason: FetchError },

    #[error("malformed content {hash}: {reason}")]
    MalformedContent { hash: String, reason: String },

    #[error("event description {hash}: {source}")]
    Descriptor {
        hash: String,
        #[source]
        source: DescriptorError,
    },

    #[error("address {address} already holds a {existing}, cannot create {requested}")]
    AddressVariantConflict {
        address: Address,
        existing: RecordKind,
        requested: RecordKind,
    },

    #[error("oracle {address} outcome already set to {current}, refusing {requested}")]
    OutcomeAlreadySet {
        address: Address,
        current: i64,
        requested: i64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ContentError> for ReconciliationError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::Unavailable { hash, source } => {
                ReconciliationError::ContentUnavailable {
                    hash,
                    reason: source,
                }
            }
            ContentError::Malformed { hash, reason } => {
                ReconciliationError::MalformedContent { hash, reason }
            }
        }
    }
}

/// What the caller should do with a failed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The event is malformed; log and drop it.
    Drop,
    /// The failure may clear up later; replay the event.
    Retry,
    /// Data integrity violation; stop and surface to the operator.
    Fatal,
}

impl ReconciliationError {
    pub fn disposition(&self) -> Disposition {
        match self {
            ReconciliationError::AddressVariantConflict { .. }
            | ReconciliationError::Store(StoreError::DuplicateKey(_))
            | ReconciliationError::Store(StoreError::ForeignKey(_))
            | ReconciliationError::Store(StoreError::Corrupt(_)) => Disposition::Fatal,
            ReconciliationError::ReferenceNotFound { .. }
            | ReconciliationError::ContentUnavailable { .. }
            | ReconciliationError::Store(_) => Disposition::Retry,
            _ => Disposition::Drop,
        }
    }

    pub fn is_reference_not_found(&self) -> bool {
        matches!(self, ReconciliationError::ReferenceNotFound { .. })
    }
}
