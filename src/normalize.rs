//! Record normalization.
//!
//! Scraped files carry untyped JSON records whose keys vary by source. This
//! module maps them onto [`CanonicalMessage`], or explains why it could not.
//! Nothing untyped leaves this module.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::CanonicalMessage;

const MESSAGE_ID_KEYS: &[&str] = &["message_id", "id"];
const CHANNEL_KEYS: &[&str] = &["channel_username", "channel_name", "channel"];
const CHANNEL_TITLE_KEYS: &[&str] = &["channel_title"];
const POSTED_AT_KEYS: &[&str] = &["posted_at", "message_date", "date"];
const TEXT_KEYS: &[&str] = &["text", "message_text"];
const VIEW_KEYS: &[&str] = &["view_count", "views"];
const FORWARD_KEYS: &[&str] = &["forward_count", "forwards"];
const HAS_MEDIA_KEYS: &[&str] = &["has_media"];
const IMAGE_PATH_KEYS: &[&str] = &["image_path"];

/// Why a single record was dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Record is not a JSON object
    #[error("record is not an object")]
    NotAnObject,

    /// No usable message identifier
    #[error("missing message_id")]
    MissingMessageId,

    /// No usable channel identifier
    #[error("missing channel_username")]
    MissingChannel,

    /// A field is present but unusable
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Canonical field name
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },
}

/// Why a whole file was skipped
#[derive(Error, Debug)]
pub enum FileRejection {
    /// File could not be read
    #[error("unreadable file: {0}")]
    Unreadable(#[from] std::io::Error),

    /// File content is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Split file content into its records
///
/// A file holds either a single record object or an array of records.
pub fn parse_file_contents(contents: &str) -> Result<Vec<Value>, FileRejection> {
    let value: Value = serde_json::from_str(contents)?;
    Ok(match value {
        Value::Array(records) => records,
        other => vec![other],
    })
}

/// Map one raw record onto a canonical message
pub fn normalize(raw: &Value) -> Result<CanonicalMessage, Rejection> {
    let record = raw.as_object().ok_or(Rejection::NotAnObject)?;

    let message_id = message_id(record)?;
    let channel_username = optional_string(record, CHANNEL_KEYS, "channel_username")?
        .ok_or(Rejection::MissingChannel)?;

    let has_media = match lookup(record, HAS_MEDIA_KEYS) {
        None => false,
        Some(Value::Bool(flag)) => *flag,
        Some(other) => {
            return Err(invalid("has_media", format!("expected boolean, got {other}")));
        }
    };
    let image_path = if has_media {
        optional_string(record, IMAGE_PATH_KEYS, "image_path")?
    } else {
        None
    };

    Ok(CanonicalMessage {
        message_id,
        channel_username,
        channel_title: optional_string(record, CHANNEL_TITLE_KEYS, "channel_title")?,
        posted_at: posted_at(record)?,
        text: optional_text(record)?,
        view_count: counter(record, VIEW_KEYS, "view_count")?,
        forward_count: counter(record, FORWARD_KEYS, "forward_count")?,
        has_media,
        image_path,
    })
}

/// First non-null value under any of `keys`
fn lookup<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !value.is_null())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> Rejection {
    Rejection::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn message_id(record: &Map<String, Value>) -> Result<i64, Rejection> {
    match lookup(record, MESSAGE_ID_KEYS) {
        None => Err(Rejection::MissingMessageId),
        Some(Value::Number(number)) => number
            .as_i64()
            .ok_or_else(|| invalid("message_id", format!("{number} is not an integer"))),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(Rejection::MissingMessageId);
            }
            trimmed
                .parse::<i64>()
                .map_err(|_| invalid("message_id", format!("{text:?} is not an integer")))
        }
        Some(other) => Err(invalid("message_id", format!("unexpected value {other}"))),
    }
}

/// Trimmed string, `None` when absent or blank
fn optional_string(
    record: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<Option<String>, Rejection> {
    match lookup(record, keys) {
        None => Ok(None),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(other) => Err(invalid(field, format!("expected string, got {other}"))),
    }
}

/// Message text is kept verbatim, empty strings included
fn optional_text(record: &Map<String, Value>) -> Result<Option<String>, Rejection> {
    match lookup(record, TEXT_KEYS) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(invalid("text", format!("expected string, got {other}"))),
    }
}

fn counter(record: &Map<String, Value>, keys: &[&str], field: &'static str) -> Result<i64, Rejection> {
    match lookup(record, keys) {
        None => Ok(0),
        Some(Value::Number(number)) => match number.as_i64() {
            Some(count) if count >= 0 => Ok(count),
            _ => Err(invalid(field, format!("{number} is not a non-negative integer"))),
        },
        Some(other) => Err(invalid(field, format!("expected integer, got {other}"))),
    }
}

fn posted_at(record: &Map<String, Value>) -> Result<Option<DateTime<Utc>>, Rejection> {
    let Some(value) = lookup(record, POSTED_AT_KEYS) else {
        return Ok(None);
    };
    let Value::String(text) = value else {
        return Err(invalid("posted_at", format!("expected timestamp string, got {value}")));
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    parse_timestamp(text)
        .map(Some)
        .ok_or_else(|| invalid("posted_at", format!("unrecognised timestamp {text:?}")))
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}
