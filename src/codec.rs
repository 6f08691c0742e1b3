//! Event codec: validates raw bus payloads and turns them into [`Event`]s.
//!
//! Required fields are `transaction_id`, `amount` and `timestamp`. Everything
//! else at the top level of the JSON object is carried in `raw_fields`.

use crate::error::DecodeError;
use crate::storage::RESERVED_SEGMENT_PREFIX;
use crate::types::event::Event;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

const TRANSACTION_ID: &str = "transaction_id";
const AMOUNT: &str = "amount";
const TIMESTAMP: &str = "timestamp";
const USER_ID: &str = "user_id";

/// Naive layouts accepted in addition to RFC 3339; interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Decode and validate a raw payload.
pub fn decode(raw: &[u8]) -> Result<Event, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let Value::Object(mut fields) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let transaction_id = take_transaction_id(&mut fields)?;
    let amount = take_amount(&mut fields)?;
    let timestamp = take_timestamp(&mut fields)?;
    let user_id = take_user_id(&mut fields)?;

    Ok(Event {
        transaction_id,
        amount,
        timestamp,
        user_id,
        raw_fields: fields.into_iter().collect(),
    })
}

/// Encode an event as canonical JSON.
///
/// Field order is fixed and `raw_fields` is sorted, so equal events always
/// encode to identical bytes.
pub fn encode(event: &Event) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(event)
}

fn take_transaction_id(fields: &mut Map<String, Value>) -> Result<String, DecodeError> {
    let id = match fields.remove(TRANSACTION_ID) {
        None | Some(Value::Null) => return Err(DecodeError::MissingField(TRANSACTION_ID)),
        Some(Value::String(id)) => id,
        Some(other) => {
            return Err(invalid(TRANSACTION_ID, format!("expected string, got {}", kind(&other))))
        }
    };

    if id.trim().is_empty() {
        return Err(invalid(TRANSACTION_ID, "must not be empty"));
    }
    // The id becomes an object key segment.
    if id == "." || id == ".." || id.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(invalid(TRANSACTION_ID, "contains characters not allowed in a storage key"));
    }
    if id.starts_with(RESERVED_SEGMENT_PREFIX) {
        return Err(invalid(
            TRANSACTION_ID,
            format!("must not start with `{}`", RESERVED_SEGMENT_PREFIX),
        ));
    }

    Ok(id)
}

fn take_amount(fields: &mut Map<String, Value>) -> Result<f64, DecodeError> {
    let amount = match fields.remove(AMOUNT) {
        None | Some(Value::Null) => return Err(DecodeError::MissingField(AMOUNT)),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| invalid(AMOUNT, format!("{} is not representable", n)))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(AMOUNT, format!("`{}` is not numeric", s)))?,
        Some(other) => {
            return Err(invalid(AMOUNT, format!("expected number, got {}", kind(&other))))
        }
    };

    if !amount.is_finite() {
        return Err(invalid(AMOUNT, "must be finite"));
    }
    if amount < 0.0 {
        return Err(invalid(AMOUNT, format!("{} is negative", amount)));
    }

    Ok(amount)
}

fn take_timestamp(fields: &mut Map<String, Value>) -> Result<DateTime<Utc>, DecodeError> {
    match fields.remove(TIMESTAMP) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(TIMESTAMP)),
        Some(Value::String(raw)) => parse_instant(raw.trim())
            .ok_or_else(|| invalid(TIMESTAMP, format!("`{}` is not an ISO-8601 instant", raw))),
        Some(other) => Err(invalid(TIMESTAMP, format!("expected string, got {}", kind(&other)))),
    }
}

fn take_user_id(fields: &mut Map<String, Value>) -> Result<String, DecodeError> {
    match fields.remove(USER_ID) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(user_id)) => Ok(user_id),
        Some(other) => Err(invalid(USER_ID, format!("expected string, got {}", kind(&other)))),
    }
}

/// Parse an RFC 3339 instant, or a naive date-time taken as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
