use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EVENT_TYPE_PAGEVIEW: &str = "pageview";
pub const EVENT_TYPE_CUSTOM: &str = "event";

/// The payload the client sends to `POST /api/collect`.
///
/// Unknown fields are ignored rather than rejected: a client that sends its
/// own identity field gets it silently dropped, the server assigns identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectPayload {
    pub site_id: String,
    /// `"pageview"` or `"event"`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub path: String,
    /// Client clock. Absent means "now"; the server clamps or rejects it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub useragent: Option<String>,
    /// Custom event name; required when `type` is `"event"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A scalar custom-property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            PropertyValue::Text(_) => None,
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

/// The stored version of an event; mirrors the DuckDB `events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub site_id: String,
    /// Server-assigned pseudo-identity. Never taken from the client.
    pub visitor_id: String,
    pub event_type: String,
    pub event_name: Option<String>,
    pub path: String,
    pub useragent: Option<String>,
    pub properties: BTreeMap<String, PropertyValue>,
    /// Client timestamp after clamping.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Properties serialized for the `properties` VARCHAR column; `None` when empty.
    pub fn properties_json(&self) -> Result<Option<String>, serde_json::Error> {
        if self.properties.is_empty() {
            return Ok(None);
        }
        serde_json::to_string(&self.properties).map(Some)
    }
}

/// Canonical form of a stored event, echoed back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub id: String,
    pub site_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub useragent: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl From<&Event> for CanonicalEvent {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            site_id: event.site_id.clone(),
            event_type: event.event_type.clone(),
            name: event.event_name.clone(),
            path: event.path.clone(),
            timestamp: event.created_at,
            useragent: event.useragent.clone(),
            properties: event.properties.clone(),
        }
    }
}

/// Acknowledgement returned by a successful `record`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    pub event: CanonicalEvent,
}

impl Ack {
    pub fn for_event(event: &Event) -> Self {
        Self {
            ok: true,
            event: CanonicalEvent::from(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_reads_camel_case_wire_fields() {
        let payload: CollectPayload = serde_json::from_value(json!({
            "siteId": "S1",
            "type": "event",
            "path": "/pricing",
            "timestamp": "2026-03-01T10:00:00Z",
            "useragent": "Mozilla/5.0",
            "name": "signup_click",
            "properties": { "plan": "pro", "seats": 3 }
        }))
        .expect("parse payload");
        assert_eq!(payload.site_id, "S1");
        assert_eq!(payload.event_type, "event");
        assert_eq!(payload.name.as_deref(), Some("signup_click"));
        assert_eq!(payload.properties.map(|p| p.len()), Some(2));
    }

    #[test]
    fn payload_ignores_client_supplied_identity() {
        let payload: CollectPayload = serde_json::from_value(json!({
            "siteId": "S1",
            "type": "pageview",
            "path": "/",
            "visitorId": "chosen-by-client"
        }))
        .expect("unknown fields are ignored");
        assert_eq!(payload.path, "/");
    }

    #[test]
    fn property_values_are_untagged_scalars() {
        let props: BTreeMap<String, PropertyValue> =
            serde_json::from_value(json!({ "a": 2, "b": "x" })).expect("parse props");
        assert_eq!(props["a"], PropertyValue::Number(2.0));
        assert_eq!(props["b"], PropertyValue::Text("x".to_string()));
    }
}
