//! Domain records produced by reconciliation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FieldReason;

/// A 20-byte contract address.
///
/// Rendered as 40 lowercase hex characters without the `0x` prefix, which is
/// also the form stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(alloy::primitives::Address);

impl Address {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl FromStr for Address {
    type Err = FieldReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let len = hex.chars().count();
        if len != 40 {
            return Err(FieldReason::InvalidAddressLength { len });
        }
        hex.parse::<alloy::primitives::Address>()
            .map(Address)
            .map_err(|_| FieldReason::InvalidHex)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&alloy::primitives::hex::encode(self.0.as_slice()))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Closed set of contract record variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    CentralizedOracle,
    UltimateOracle,
    ScalarEvent,
    CategoricalEvent,
    Market,
    OutcomeToken,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::CentralizedOracle,
        RecordKind::UltimateOracle,
        RecordKind::ScalarEvent,
        RecordKind::CategoricalEvent,
        RecordKind::Market,
        RecordKind::OutcomeToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::CentralizedOracle => "centralized_oracle",
            RecordKind::UltimateOracle => "ultimate_oracle",
            RecordKind::ScalarEvent => "scalar_event",
            RecordKind::CategoricalEvent => "categorical_event",
            RecordKind::Market => "market",
            RecordKind::OutcomeToken => "outcome_token",
        }
    }

    pub fn is_oracle(&self) -> bool {
        matches!(
            self,
            RecordKind::CentralizedOracle | RecordKind::UltimateOracle
        )
    }

    pub fn is_event(&self) -> bool {
        matches!(self, RecordKind::ScalarEvent | RecordKind::CategoricalEvent)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown record kind: {}", s))
    }
}

/// Identifies a persisted contract record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub kind: RecordKind,
    pub address: Address,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.address)
    }
}

/// Fields shared by every contract created through a factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMeta {
    pub address: Address,
    pub factory: Address,
    pub creator: Address,
    pub creation_block: i64,
    pub creation_date_time: DateTime<Utc>,
}

/// Resolution state shared by both oracle variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleState {
    pub is_outcome_set: bool,
    pub outcome: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralizedOracle {
    pub meta: ContractMeta,
    pub owner: Address,
    /// IPFS hash of the shared [`EventDescription`].
    pub event_description: String,
    pub state: OracleState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UltimateOracle {
    pub meta: ContractMeta,
    /// Absent when the forwarded oracle was unknown at creation time.
    pub forwarded_oracle: Option<Address>,
    pub collateral_token: Address,
    pub spread_multiplier: Decimal,
    pub challenge_period: i64,
    pub challenge_amount: Decimal,
    pub front_runner_period: i64,
    pub state: OracleState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub meta: ContractMeta,
    pub collateral_token: Address,
    pub oracle: Address,
    pub lower_bound: Decimal,
    pub upper_bound: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalEvent {
    pub meta: ContractMeta,
    pub collateral_token: Address,
    pub oracle: Address,
    pub outcome_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub meta: ContractMeta,
    pub event: Address,
    pub market_maker: Address,
    pub fee: Decimal,
    pub revenue: Decimal,
    pub collected_fees: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeToken {
    pub address: Address,
    pub event: Address,
    pub index: i64,
}

/// Any persisted contract record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    CentralizedOracle(CentralizedOracle),
    UltimateOracle(UltimateOracle),
    ScalarEvent(ScalarEvent),
    CategoricalEvent(CategoricalEvent),
    Market(Market),
    OutcomeToken(OutcomeToken),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::CentralizedOracle(_) => RecordKind::CentralizedOracle,
            Record::UltimateOracle(_) => RecordKind::UltimateOracle,
            Record::ScalarEvent(_) => RecordKind::ScalarEvent,
            Record::CategoricalEvent(_) => RecordKind::CategoricalEvent,
            Record::Market(_) => RecordKind::Market,
            Record::OutcomeToken(_) => RecordKind::OutcomeToken,
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Record::CentralizedOracle(r) => r.meta.address,
            Record::UltimateOracle(r) => r.meta.address,
            Record::ScalarEvent(r) => r.meta.address,
            Record::CategoricalEvent(r) => r.meta.address,
            Record::Market(r) => r.meta.address,
            Record::OutcomeToken(r) => r.address,
        }
    }

    pub fn id(&self) -> RecordId {
        RecordId {
            kind: self.kind(),
            address: self.address(),
        }
    }

    /// Oracle resolution state, for oracle variants only.
    pub fn oracle_state(&self) -> Option<OracleState> {
        match self {
            Record::CentralizedOracle(r) => Some(r.state),
            Record::UltimateOracle(r) => Some(r.state),
            _ => None,
        }
    }

    pub fn oracle_state_mut(&mut self) -> Option<&mut OracleState> {
        match self {
            Record::CentralizedOracle(r) => Some(&mut r.state),
            Record::UltimateOracle(r) => Some(&mut r.state),
            _ => None,
        }
    }
}

/// Variant-specific part of an event description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DescriptionVariant {
    Scalar { unit: String, decimals: i64 },
    Categorical { outcomes: Vec<String> },
}

/// Off-chain event description, keyed by its IPFS hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescription {
    pub ipfs_hash: String,
    pub title: String,
    pub description: String,
    pub resolution_date: DateTime<Utc>,
    pub variant: DescriptionVariant,
}

impl EventDescription {
    /// A description is fully populated once it carries a title.
    pub fn is_populated(&self) -> bool {
        !self.title.is_empty()
    }

    pub fn kind_str(&self) -> &'static str {
        match self.variant {
            DescriptionVariant::Scalar { .. } => "scalar",
            DescriptionVariant::Categorical { .. } => "categorical",
        }
    }
}
