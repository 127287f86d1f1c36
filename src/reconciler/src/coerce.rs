//! Typed field coercers.
//!
//! Plain coercers turn a raw JSON parameter into a typed value. Reference
//! coercers additionally look the value up in the record store, with the
//! missing-record policy passed in explicitly.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info};

use crate::descriptor;
use crate::error::{FieldError, FieldReason, ReconciliationError};
use crate::ipfs::{ContentFetcher, ContentResolver};
use crate::models::{Address, EventDescription, Record};
use crate::store::RecordStore;

/// What to do when a referenced record does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPolicy {
    /// Fail with `ReferenceNotFound`.
    Required,
    /// Store an absent reference.
    Optional,
}

fn fail<T>(field: &str, reason: FieldReason) -> Result<T, FieldError> {
    Err(FieldError::new(field, reason))
}

pub fn address(field: &str, raw: &Value) -> Result<Address, FieldError> {
    let s = raw
        .as_str()
        .ok_or_else(|| FieldError::new(field, FieldReason::NotAString))?;
    Address::from_str(s).map_err(|reason| FieldError::new(field, reason))
}

pub fn integer(field: &str, raw: &Value) -> Result<i64, FieldError> {
    match raw {
        Value::Number(n) => match n.as_i64() {
            Some(v) => Ok(v),
            None if is_integer_literal(&n.to_string()) => fail(field, FieldReason::OutOfRange),
            None => fail(field, FieldReason::NotAnInteger),
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(v) => Ok(v),
                Err(_) if is_integer_literal(s) => fail(field, FieldReason::OutOfRange),
                Err(_) => fail(field, FieldReason::NotAnInteger),
            }
        }
        _ => fail(field, FieldReason::NotAnInteger),
    }
}

pub fn unsigned(field: &str, raw: &Value) -> Result<i64, FieldError> {
    let v = integer(field, raw)?;
    if v < 0 {
        return fail(field, FieldReason::Negative);
    }
    Ok(v)
}

/// Arbitrary on-chain integer held as a scale-0 decimal.
pub fn amount(field: &str, raw: &Value) -> Result<Decimal, FieldError> {
    // Numbers keep their source text, so large integers are parsed exactly.
    let parsed = match raw {
        Value::Number(n) => decimal_text(field, &n.to_string())?,
        Value::String(s) => decimal_text(field, s.trim())?,
        _ => return fail(field, FieldReason::NotAnInteger),
    };

    if !parsed.fract().is_zero() {
        return fail(field, FieldReason::NotAnInteger);
    }
    Ok(parsed.trunc())
}

pub fn boolean(field: &str, raw: &Value) -> Result<bool, FieldError> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        _ => fail(field, FieldReason::NotABoolean),
    }
}

/// Unix seconds to a UTC timestamp.
pub fn timestamp(field: &str, raw: &Value) -> Result<DateTime<Utc>, FieldError> {
    let secs = integer(field, raw)?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| FieldError::new(field, FieldReason::OutOfRange))
}

fn decimal_text(field: &str, s: &str) -> Result<Decimal, FieldError> {
    if let Ok(d) = Decimal::from_str(s) {
        return Ok(d);
    }
    if is_integer_literal(s) {
        return fail(field, FieldReason::OutOfRange);
    }
    if s.contains(|c| c == 'e' || c == 'E') {
        return Decimal::from_scientific(s)
            .map_err(|_| FieldError::new(field, FieldReason::OutOfRange));
    }
    fail(field, FieldReason::NotAnInteger)
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve an oracle reference.
///
/// Returns `Ok(None)` for an unknown oracle under [`RefPolicy::Optional`].
pub async fn oracle_ref<S>(
    store: &S,
    field: &'static str,
    raw: &Value,
    policy: RefPolicy,
) -> Result<Option<Record>, ReconciliationError>
where
    S: RecordStore + ?Sized,
{
    let address = address(field, raw)?;
    match store.find_oracle(&address).await? {
        Some(oracle) => Ok(Some(oracle)),
        None if policy == RefPolicy::Optional => {
            debug!("Oracle {} for `{}` not known yet, storing null", address, field);
            Ok(None)
        }
        None => Err(ReconciliationError::ReferenceNotFound {
            field,
            kind: "oracle",
            address,
        }),
    }
}

/// Resolve a mandatory event reference.
pub async fn event_ref<S>(
    store: &S,
    field: &'static str,
    raw: &Value,
) -> Result<Record, ReconciliationError>
where
    S: RecordStore + ?Sized,
{
    let address = address(field, raw)?;
    store
        .find_event(&address)
        .await?
        .ok_or(ReconciliationError::ReferenceNotFound {
            field,
            kind: "event",
            address,
        })
}

/// Resolve an IPFS hash into a persisted event description.
///
/// A fully populated description already in the store is reused. Otherwise
/// the descriptor is fetched, disambiguated and persisted. Fetch failures are
/// reported as `ContentUnavailable`.
pub async fn event_description<S, F>(
    store: &S,
    resolver: &ContentResolver<F>,
    field: &'static str,
    raw: &Value,
) -> Result<EventDescription, ReconciliationError>
where
    S: RecordStore + ?Sized,
    F: ContentFetcher,
{
    let hash = raw
        .as_str()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| FieldError::new(field, FieldReason::NotAString))?;

    if let Some(existing) = store.get_description(hash).await? {
        if existing.is_populated() {
            debug!("Reusing stored event description {}", hash);
            return Ok(existing);
        }
    }

    let json = resolver.resolve(hash).await?;
    let description = descriptor::disambiguate(hash, &json).map_err(|source| {
        ReconciliationError::Descriptor {
            hash: hash.to_string(),
            source,
        }
    })?;

    store.put_description(&description).await?;
    info!(
        "Stored {} event description {} ({})",
        description.kind_str(),
        hash,
        description.title
    );

    Ok(description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::ipfs::MockContentFetcher;
    use crate::models::{ContractMeta, DescriptionVariant, OracleState, UltimateOracle};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;
    use serde_json::json;

    const ORACLE: &str = "0x1111111111111111111111111111111111111111";

    async fn store_with_oracle() -> MemoryStore {
        let store = MemoryStore::new();
        let a: Address = ORACLE.parse().unwrap();
        store
            .put(&Record::UltimateOracle(UltimateOracle {
                meta: ContractMeta {
                    address: a,
                    factory: a,
                    creator: a,
                    creation_block: 1,
                    creation_date_time: Utc.timestamp_opt(0, 0).unwrap(),
                },
                forwarded_oracle: None,
                collateral_token: a,
                spread_multiplier: dec!(1),
                challenge_period: 1,
                challenge_amount: dec!(1),
                front_runner_period: 1,
                state: OracleState::default(),
            }))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_address_length() {
        let ok = json!("a".repeat(40));
        assert!(address("creator", &ok).is_ok());

        for len in [39, 41] {
            let err = address("creator", &json!("a".repeat(len))).unwrap_err();
            assert_eq!(err.field, "creator");
            assert_eq!(err.reason, FieldReason::InvalidAddressLength { len });
        }
    }

    #[test]
    fn test_address_must_be_string() {
        let err = address("creator", &json!(12)).unwrap_err();
        assert_eq!(err.reason, FieldReason::NotAString);
    }

    #[test]
    fn test_integer_from_number_and_string() {
        assert_eq!(integer("fee", &json!(12)).unwrap(), 12);
        assert_eq!(integer("fee", &json!(" -7 ")).unwrap(), -7);
        assert_eq!(
            integer("fee", &json!("99999999999999999999")).unwrap_err().reason,
            FieldReason::OutOfRange
        );
        assert_eq!(
            integer("fee", &json!("1.5")).unwrap_err().reason,
            FieldReason::NotAnInteger
        );
        assert_eq!(
            integer("fee", &json!(null)).unwrap_err().reason,
            FieldReason::NotAnInteger
        );
    }

    #[test]
    fn test_unsigned_rejects_negative() {
        assert_eq!(unsigned("index", &json!(0)).unwrap(), 0);
        assert_eq!(
            unsigned("index", &json!(-1)).unwrap_err().reason,
            FieldReason::Negative
        );
    }

    #[test]
    fn test_amount_handles_large_values() {
        assert_eq!(
            amount("challengeAmount", &json!("100000000000000000000")).unwrap(),
            dec!(100000000000000000000)
        );
        assert_eq!(amount("lowerBound", &json!(-5)).unwrap(), dec!(-5));
        assert_eq!(
            amount("fee", &json!("0.5")).unwrap_err().reason,
            FieldReason::NotAnInteger
        );
        assert_eq!(
            amount("fee", &json!("1".repeat(80))).unwrap_err().reason,
            FieldReason::OutOfRange
        );
    }

    #[test]
    fn test_large_json_numbers_keep_every_digit() {
        let exact: Value = serde_json::from_str("123456789000000000001").unwrap();
        assert_eq!(
            amount("challengeAmount", &exact).unwrap(),
            dec!(123456789000000000001)
        );
        let exact: Value = serde_json::from_str("100000000000000000003").unwrap();
        assert_eq!(amount("fee", &exact).unwrap(), dec!(100000000000000000003));

        let scientific: Value = serde_json::from_str("1e3").unwrap();
        assert_eq!(amount("fee", &scientific).unwrap(), dec!(1000));

        let huge: Value = serde_json::from_str(&"9".repeat(80)).unwrap();
        assert_eq!(
            amount("fee", &huge).unwrap_err().reason,
            FieldReason::OutOfRange
        );
    }

    #[test]
    fn test_integer_number_beyond_u64_is_out_of_range() {
        let big: Value = serde_json::from_str("123456789000000000001").unwrap();
        assert_eq!(
            integer("outcome", &big).unwrap_err().reason,
            FieldReason::OutOfRange
        );
        let fraction: Value = serde_json::from_str("1.5").unwrap();
        assert_eq!(
            integer("outcome", &fraction).unwrap_err().reason,
            FieldReason::NotAnInteger
        );
    }

    #[test]
    fn test_boolean() {
        assert!(boolean("isOutcomeSet", &json!(true)).unwrap());
        assert!(!boolean("isOutcomeSet", &json!("False")).unwrap());
        assert!(boolean("isOutcomeSet", &json!(1)).is_err());
    }

    #[test]
    fn test_timestamp() {
        let ts = timestamp("creation_date_time", &json!(1_500_000_000)).unwrap();
        assert_eq!(ts.timestamp(), 1_500_000_000);
    }

    #[tokio::test]
    async fn test_oracle_ref_policies() {
        let store = store_with_oracle().await;
        let unknown = json!("2".repeat(40));

        let found = oracle_ref(&store, "oracle", &json!(ORACLE), RefPolicy::Required)
            .await
            .unwrap();
        assert!(found.is_some());

        let absent = oracle_ref(&store, "oracle", &unknown, RefPolicy::Optional)
            .await
            .unwrap();
        assert!(absent.is_none());

        let err = oracle_ref(&store, "oracle", &unknown, RefPolicy::Required)
            .await
            .unwrap_err();
        assert!(err.is_reference_not_found());
    }

    #[tokio::test]
    async fn test_oracle_ref_checks_length_first() {
        let store = MemoryStore::new();
        let err = oracle_ref(&store, "oracle", &json!("abc"), RefPolicy::Optional)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::Field(FieldError {
                reason: FieldReason::InvalidAddressLength { len: 3 },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_event_ref_requires_event_variant() {
        let store = store_with_oracle().await;
        // An oracle address is not an event.
        let err = event_ref(&store, "eventContract", &json!(ORACLE))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::ReferenceNotFound { kind: "event", .. }
        ));
    }

    #[tokio::test]
    async fn test_event_description_fetches_once() {
        let store = MemoryStore::new();
        let mut mock = MockContentFetcher::new();
        mock.expect_get().times(1).returning(|_| {
            Ok(br#"{"title":"T","description":"D","resolutionDate":"2020-01-01","unit":"ETH","decimals":18}"#.to_vec())
        });
        let resolver = ContentResolver::new(mock);

        let first = event_description(&store, &resolver, "ipfsHash", &json!("QmScalar"))
            .await
            .unwrap();
        let second = event_description(&store, &resolver, "ipfsHash", &json!("QmScalar"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.variant,
            DescriptionVariant::Scalar {
                unit: "ETH".to_string(),
                decimals: 18
            }
        );
        assert_eq!(store.description_count().await, 1);
    }

    #[tokio::test]
    async fn test_event_description_fetch_failure_is_strict() {
        let store = MemoryStore::new();
        let mut mock = MockContentFetcher::new();
        mock.expect_get()
            .returning(|_| Err(FetchError::Network("connection refused".to_string())));
        let resolver = ContentResolver::new(mock);

        let err = event_description(&store, &resolver, "ipfsHash", &json!("QmDown"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconciliationError::ContentUnavailable { .. }));
        assert_eq!(store.description_count().await, 0);
    }

    #[tokio::test]
    async fn test_event_description_invalid_descriptor_not_stored() {
        let store = MemoryStore::new();
        let mut mock = MockContentFetcher::new();
        mock.expect_get()
            .returning(|_| Ok(br#"{"description":"D","resolutionDate":"2020-01-01","outcomes":[]}"#.to_vec()));
        let resolver = ContentResolver::new(mock);

        let err = event_description(&store, &resolver, "ipfsHash", &json!("QmNoTitle"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconciliationError::Descriptor { .. }));
        assert_eq!(store.description_count().await, 0);
    }
}
