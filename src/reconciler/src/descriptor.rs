//! Event description variant selection.
//!
//! A descriptor is scalar when it carries both `unit` and `decimals`, and
//! categorical when it carries `outcomes`. Common fields are checked first so
//! a descriptor without a title is always reported as such, whatever else it
//! contains.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::DescriptorError;
use crate::models::{DescriptionVariant, EventDescription};

const TITLE: &str = "title";
const DESCRIPTION: &str = "description";
const RESOLUTION_DATE: &str = "resolutionDate";
const RESOLUTION_DATE_ALIAS: &str = "resolution_date";
const UNIT: &str = "unit";
const DECIMALS: &str = "decimals";
const OUTCOMES: &str = "outcomes";

/// Build the concrete description variant for a descriptor fetched under `ipfs_hash`.
pub fn disambiguate(
    ipfs_hash: &str,
    json: &Map<String, Value>,
) -> Result<EventDescription, DescriptorError> {
    let title = json
        .get(TITLE)
        .ok_or(DescriptorError::MissingDescriptorField { field: TITLE })?;
    let description = json
        .get(DESCRIPTION)
        .ok_or(DescriptorError::MissingDescriptorField { field: DESCRIPTION })?;
    let resolution_date = json
        .get(RESOLUTION_DATE)
        .or_else(|| json.get(RESOLUTION_DATE_ALIAS))
        .ok_or(DescriptorError::MissingDescriptorField {
            field: RESOLUTION_DATE,
        })?;

    let has_unit = json.contains_key(UNIT);
    let has_decimals = json.contains_key(DECIMALS);
    let has_outcomes = json.contains_key(OUTCOMES);

    let variant = match (has_unit, has_decimals, has_outcomes) {
        (true, true, true) => return Err(DescriptorError::AmbiguousDescriptor),
        (true, false, _) | (false, true, _) => {
            return Err(DescriptorError::IncompleteScalarDescriptor)
        }
        (false, false, false) => return Err(DescriptorError::UnknownDescriptorVariant),
        (true, true, false) => DescriptionVariant::Scalar {
            unit: string_field(UNIT, &json[UNIT])?,
            decimals: integer_field(DECIMALS, &json[DECIMALS])?,
        },
        (false, false, true) => DescriptionVariant::Categorical {
            outcomes: outcomes_field(&json[OUTCOMES])?,
        },
    };

    Ok(EventDescription {
        ipfs_hash: ipfs_hash.to_string(),
        title: string_field(TITLE, title)?,
        description: string_field(DESCRIPTION, description)?,
        resolution_date: date_field(resolution_date)?,
        variant,
    })
}

fn invalid(field: &'static str, reason: &str) -> DescriptorError {
    DescriptorError::InvalidDescriptorField {
        field,
        reason: reason.to_string(),
    }
}

fn string_field(field: &'static str, value: &Value) -> Result<String, DescriptorError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(field, "expected a string"))
}

fn integer_field(field: &'static str, value: &Value) -> Result<i64, DescriptorError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(field, "expected an integer"))
}

fn outcomes_field(value: &Value) -> Result<Vec<String>, DescriptorError> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(OUTCOMES, "expected an array of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(OUTCOMES, "expected an array of strings"))
        })
        .collect()
}

fn date_field(value: &Value) -> Result<DateTime<Utc>, DescriptorError> {
    let raw = value
        .as_str()
        .ok_or_else(|| invalid(RESOLUTION_DATE, "expected a date string"))?;
    parse_resolution_date(raw).ok_or_else(|| invalid(RESOLUTION_DATE, "unrecognised date format"))
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS` and bare `YYYY-MM-DD` (midnight UTC).
fn parse_resolution_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
