//! Lenient timestamp decoding for event `ts` fields.
//!
//! Runtimes emit RFC 3339 strings, epoch seconds, or epoch milliseconds
//! depending on the node kind. Anything unrecognised decodes to `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Numbers below this are epoch seconds, above it epoch milliseconds.
const SECONDS_CUTOFF: f64 = 1e11;

pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    value.serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_timestamp))
}

/// Parse a JSON value into a UTC timestamp.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| s.trim().parse::<f64>().ok().and_then(from_epoch)),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(x: f64) -> Option<DateTime<Utc>> {
    if !x.is_finite() {
        return None;
    }
    let millis = if x.abs() < SECONDS_CUTOFF { x * 1000.0 } else { x };
    DateTime::from_timestamp_millis(millis as i64)
}
