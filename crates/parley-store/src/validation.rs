//! Shape checks for message records arriving from the backend.
//!
//! Every record, whether it comes from a bulk load, a send echo or the
//! realtime feed, goes through [`validate_message`] before it can reach the
//! [`MessageStore`](crate::MessageStore).  Nothing is coerced: the first field
//! that fails its check is reported together with the rejected value.

use chrono::{DateTime, NaiveDateTime, Utc};
use parley_shared::ValidationError;
use serde_json::{Map, Value};
use uuid::{Uuid, Variant};

use crate::models::{Message, UserSummary};

/// Required fields in check order.
const REQUIRED_FIELDS: [&str; 6] = ["id", "content", "channel_id", "user_id", "created_at", "user"];

/// Validate a raw backend row and convert it into a [`Message`].
pub fn validate_message(raw: &Value) -> Result<Message, ValidationError> {
    let record = raw
        .as_object()
        .ok_or_else(|| ValidationError::invalid("id", raw))?;

    for field in REQUIRED_FIELDS {
        if !record.contains_key(field) {
            return Err(ValidationError::missing(field));
        }
    }

    let id = required_uuid(record, "id")?;
    let content = match &record["content"] {
        Value::String(s) => s.clone(),
        other => return Err(ValidationError::invalid("content", other)),
    };
    let channel_id = required_uuid(record, "channel_id")?;
    let user_id = required_uuid(record, "user_id")?;
    let created_at = nullable_timestamp(record, "created_at")?;
    let user = validate_user(&record["user"])?;

    let file_url = nullable_string(record, "file_url")?;
    let attachment_path = nullable_string(record, "attachment_path")?;
    let edited_at = nullable_timestamp(record, "edited_at")?;
    let edited_by = optional_uuid(record, "edited_by")?;
    let parent_message_id = optional_uuid(record, "parent_message_id")?;

    Ok(Message {
        id,
        channel_id,
        user_id,
        content,
        file_url,
        attachment_path,
        created_at,
        edited_at,
        edited_by,
        parent_message_id,
        user,
    })
}

fn validate_user(value: &Value) -> Result<UserSummary, ValidationError> {
    let invalid = || ValidationError::invalid("user", value);
    let user = value.as_object().ok_or_else(invalid)?;

    let id = user.get("id").and_then(parse_uuid).ok_or_else(invalid)?;
    let name = user.get("name").and_then(Value::as_str).ok_or_else(invalid)?;
    let email = user.get("email").and_then(Value::as_str).ok_or_else(invalid)?;
    let avatar_url = match user.get("avatar_url") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(invalid()),
    };
    let created_at = user
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .ok_or_else(invalid)?;
    let last_seen = match user.get("last_seen") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(parse_timestamp(s).ok_or_else(invalid)?),
        Some(_) => return Err(invalid()),
    };

    Ok(UserSummary {
        id,
        name: name.to_string(),
        email: email.to_string(),
        avatar_url,
        created_at,
        last_seen,
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn required_uuid(record: &Map<String, Value>, field: &'static str) -> Result<Uuid, ValidationError> {
    let value = &record[field];
    parse_uuid(value).ok_or_else(|| ValidationError::invalid(field, value))
}

// Absent and null both mean "not set" for optional references.
fn optional_uuid(
    record: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<Uuid>, ValidationError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_uuid(value)
            .map(Some)
            .ok_or_else(|| ValidationError::invalid(field, value)),
    }
}

fn nullable_string(
    record: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ValidationError::invalid(field, other)),
    }
}

fn nullable_timestamp(
    record: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::String(s)) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| ValidationError::invalid(field, value)),
        Some(other) => Err(ValidationError::invalid(field, other)),
    }
}

/// Accepts hyphenated random (version 4, RFC 4122 variant) UUIDs only, the
/// shape the backend issues for every primary key.
pub fn parse_uuid(value: &Value) -> Option<Uuid> {
    let s = value.as_str()?;
    if s.len() != 36 {
        return None;
    }
    let uuid = Uuid::parse_str(s).ok()?;
    (uuid.get_version_num() == 4 && uuid.get_variant() == Variant::RFC4122).then_some(uuid)
}

/// Parse the timestamp shapes the backend emits.
///
/// RFC 3339 first, then Postgres' space-separated form with an optional
/// offset.  A timestamp without offset is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}
