//! Validated decoding at the API boundary
//!
//! The backend is loose about types: ids arrive as numbers or strings,
//! amounts as floats or decimal strings, timestamps in two formats. Every
//! wire record is converted into its domain model through the helpers here,
//! so the rest of the client only ever sees typed values or a
//! [`DecodeError`].

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Failure to turn a wire record into a domain model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{record}: missing field `{field}`")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    #[error("{record}: invalid `{field}`: {reason}")]
    InvalidField {
        record: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("{record}: unknown status `{value}`")]
    UnknownStatus { record: &'static str, value: String },
}

impl DecodeError {
    pub fn missing(record: &'static str, field: &'static str) -> Self {
        Self::MissingField { record, field }
    }

    pub fn invalid(record: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            record,
            field,
            reason: reason.into(),
        }
    }
}

/// Unwrap a required field
pub fn required<T>(
    value: Option<T>,
    record: &'static str,
    field: &'static str,
) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::missing(record, field))
}

/// Trimmed, non-empty text or `None`
pub fn text(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Identifier sent either as a JSON number or a string
pub fn id(value: &Value, record: &'static str, field: &'static str) -> Result<String, DecodeError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::String(_) => Err(DecodeError::invalid(record, field, "empty identifier")),
        Value::Null => Err(DecodeError::missing(record, field)),
        other => Err(DecodeError::invalid(
            record,
            field,
            format!("expected number or string, got {other}"),
        )),
    }
}

/// Optional identifier; `null` and absent both mean "unset"
pub fn optional_id(
    value: Option<&Value>,
    record: &'static str,
    field: &'static str,
) -> Result<Option<String>, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => id(v, record, field).map(Some),
    }
}

/// Decimal amount sent as a JSON number or a numeric string
pub fn decimal(
    value: &Value,
    record: &'static str,
    field: &'static str,
) -> Result<Decimal, DecodeError> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Null => return Err(DecodeError::missing(record, field)),
        other => {
            return Err(DecodeError::invalid(
                record,
                field,
                format!("expected number, got {other}"),
            ));
        }
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|e| DecodeError::invalid(record, field, format!("`{raw}`: {e}")))
}

/// Optional decimal; `null` and absent both mean "unset"
pub fn optional_decimal(
    value: Option<&Value>,
    record: &'static str,
    field: &'static str,
) -> Result<Option<Decimal>, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => decimal(v, record, field).map(Some),
    }
}

/// Boolean sent as `true`/`false`, `0`/`1` or a string form of either
pub fn boolean(value: &Value, record: &'static str, field: &'static str) -> Result<bool, DecodeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(DecodeError::invalid(record, field, format!("`{n}` is not 0 or 1"))),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "online" => Ok(true),
            "false" | "0" | "offline" => Ok(false),
            other => Err(DecodeError::invalid(
                record,
                field,
                format!("`{other}` is not a boolean"),
            )),
        },
        Value::Null => Err(DecodeError::missing(record, field)),
        other => Err(DecodeError::invalid(
            record,
            field,
            format!("expected boolean, got {other}"),
        )),
    }
}

/// Timestamp in RFC 3339 or `YYYY-MM-DD HH:MM:SS` (assumed UTC)
pub fn timestamp(
    raw: &str,
    record: &'static str,
    field: &'static str,
) -> Result<DateTime<Utc>, DecodeError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(DecodeError::invalid(
        record,
        field,
        format!("`{raw}` is not a timestamp"),
    ))
}

/// Optional timestamp; empty strings count as absent
pub fn optional_timestamp(
    raw: Option<&str>,
    record: &'static str,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, DecodeError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => timestamp(s, record, field).map(Some),
    }
}
