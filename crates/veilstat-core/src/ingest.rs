//! Stateless validation of incoming events.
//!
//! Everything that can be decided from the payload alone lives here; the
//! site lookup and the write happen in the server's `record` path.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::{
    config::IngestLimits,
    error::ValidationError,
    event::{CollectPayload, Event, PropertyValue, EVENT_TYPE_CUSTOM, EVENT_TYPE_PAGEVIEW},
};

pub const MAX_SITE_ID_LEN: usize = 64;
pub const MAX_PROPERTY_KEY_LEN: usize = 64;

/// An event that passed payload validation but has no identity yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub site_id: String,
    pub event_type: String,
    pub event_name: Option<String>,
    pub path: String,
    pub useragent: Option<String>,
    pub properties: BTreeMap<String, PropertyValue>,
    pub created_at: DateTime<Utc>,
}

impl ValidatedEvent {
    pub fn into_event(self, visitor_id: String) -> Event {
        Event {
            id: uuid::Uuid::new_v4().to_string(),
            site_id: self.site_id,
            visitor_id,
            event_type: self.event_type,
            event_name: self.event_name,
            path: self.path,
            useragent: self.useragent,
            properties: self.properties,
            created_at: self.created_at,
        }
    }
}

/// Decode a raw request body. Accepts any content type, so `text/plain`
/// beacons decode the same way as `application/json` posts.
pub fn parse_payload(body: &[u8], limits: &IngestLimits) -> Result<CollectPayload, ValidationError> {
    if body.len() > limits.max_body_bytes {
        return Err(ValidationError::PayloadTooLarge(limits.max_body_bytes));
    }
    serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))
}

/// Property keys are restricted so they can be addressed as JSON paths.
pub fn is_valid_property_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_PROPERTY_KEY_LEN
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn bounded(
    field: &'static str,
    value: String,
    max: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if trimmed.len() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(trimmed.to_string())
}

/// Resolve the stored timestamp: reject outside the skew window, clamp small
/// future drift to `now`, default to `now` when the client sent none.
pub fn clamp_timestamp(
    timestamp: Option<DateTime<Utc>>,
    limits: &IngestLimits,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    let Some(ts) = timestamp else {
        return Ok(now);
    };
    if ts > now + Duration::seconds(limits.max_future_skew_secs) {
        return Err(ValidationError::TimestampInFuture);
    }
    if ts < now - Duration::seconds(limits.max_event_age_secs) {
        return Err(ValidationError::TimestampTooOld);
    }
    Ok(ts.min(now))
}

fn validate_properties(
    raw: Option<serde_json::Map<String, serde_json::Value>>,
    limits: &IngestLimits,
) -> Result<BTreeMap<String, PropertyValue>, ValidationError> {
    let Some(raw) = raw else {
        return Ok(BTreeMap::new());
    };
    if raw.len() > limits.max_properties {
        return Err(ValidationError::TooManyProperties {
            count: raw.len(),
            max: limits.max_properties,
        });
    }

    let mut properties = BTreeMap::new();
    for (key, value) in raw {
        if !is_valid_property_key(&key) {
            return Err(ValidationError::InvalidPropertyKey(key));
        }
        let value = match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() => PropertyValue::Number(f),
                _ => return Err(ValidationError::NonScalarProperty(key)),
            },
            serde_json::Value::String(s) => {
                if s.len() > limits.max_property_value_len {
                    return Err(ValidationError::TooLong {
                        field: "properties",
                        max: limits.max_property_value_len,
                    });
                }
                PropertyValue::Text(s)
            }
            _ => return Err(ValidationError::NonScalarProperty(key)),
        };
        properties.insert(key, value);
    }
    Ok(properties)
}

/// Validate everything about `payload` that does not need storage.
pub fn validate_payload(
    payload: CollectPayload,
    limits: &IngestLimits,
    now: DateTime<Utc>,
) -> Result<ValidatedEvent, ValidationError> {
    let site_id = bounded("siteId", payload.site_id, MAX_SITE_ID_LEN)?;

    let (event_type, event_name) = match payload.event_type.trim() {
        EVENT_TYPE_PAGEVIEW => (EVENT_TYPE_PAGEVIEW.to_string(), None),
        EVENT_TYPE_CUSTOM => {
            let name = payload.name.ok_or(ValidationError::MissingName)?;
            let name = bounded("name", name, limits.max_event_name_len)
                .map_err(|e| match e {
                    ValidationError::Empty { .. } => ValidationError::MissingName,
                    other => other,
                })?;
            (EVENT_TYPE_CUSTOM.to_string(), Some(name))
        }
        other => return Err(ValidationError::InvalidType(other.to_string())),
    };

    let path = bounded("path", payload.path, limits.max_path_len)?;

    let useragent = match payload.useragent {
        Some(ua) if ua.len() > limits.max_useragent_len => {
            return Err(ValidationError::TooLong {
                field: "useragent",
                max: limits.max_useragent_len,
            })
        }
        Some(ua) if ua.trim().is_empty() => None,
        other => other,
    };

    let created_at = clamp_timestamp(payload.timestamp, limits, now)?;
    let properties = validate_properties(payload.properties, limits)?;

    Ok(ValidatedEvent {
        site_id,
        event_type,
        event_name,
        path,
        useragent,
        properties,
        created_at,
    })
}
