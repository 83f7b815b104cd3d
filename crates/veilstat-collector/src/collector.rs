use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error};
use veilstat_core::event::{CollectPayload, PropertyValue, EVENT_TYPE_CUSTOM, EVENT_TYPE_PAGEVIEW};

use crate::error::CollectorError;
use crate::transport::{HttpTransport, Transport, BEACON_TIMEOUT};

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Base URL of the ingestion server, e.g. `https://stats.example.com`.
    pub endpoint: String,
    pub site_id: Option<String>,
    pub user_agent: Option<String>,
}

impl CollectorConfig {
    pub fn new(endpoint: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            site_id: Some(site_id.into()),
            user_agent: None,
        }
    }
}

pub struct Collector {
    site_id: String,
    user_agent: Option<String>,
    transport: Arc<dyn Transport>,
    current_path: Mutex<String>,
    pending: Mutex<Option<CollectPayload>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_json_properties(
    properties: BTreeMap<String, PropertyValue>,
) -> Option<serde_json::Map<String, serde_json::Value>> {
    let map: serde_json::Map<String, serde_json::Value> = properties
        .into_iter()
        .filter_map(|(key, value)| serde_json::to_value(value).ok().map(|v| (key, v)))
        .collect();
    (!map.is_empty()).then_some(map)
}

impl Collector {
    /// Refuses to start without a site id.
    pub fn start(
        config: CollectorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CollectorError> {
        let site_id = match config.site_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                error!("Collector not started: site id is not configured");
                return Err(CollectorError::ConfigurationMissing("site_id"));
            }
        };
        Ok(Self {
            site_id,
            user_agent: config.user_agent,
            transport,
            current_path: Mutex::new("/".to_string()),
            pending: Mutex::new(None),
        })
    }

    /// Start with the HTTP transport pointed at `config.endpoint`.
    pub fn start_http(config: CollectorConfig) -> Result<Self, CollectorError> {
        let transport = HttpTransport::new(&config.endpoint)?;
        Self::start(config, Arc::new(transport))
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    fn payload(
        &self,
        event_type: &str,
        name: Option<String>,
        properties: BTreeMap<String, PropertyValue>,
    ) -> CollectPayload {
        CollectPayload {
            site_id: self.site_id.clone(),
            event_type: event_type.to_string(),
            path: lock(&self.current_path).clone(),
            timestamp: Some(Utc::now()),
            useragent: self.user_agent.clone(),
            name,
            properties: to_json_properties(properties),
        }
    }

    /// Record a page load: emits one `pageview` immediately.
    pub fn page_loaded(&self, path: &str) {
        *lock(&self.current_path) = path.to_string();
        let payload = self.payload(EVENT_TYPE_PAGEVIEW, None, BTreeMap::new());
        self.transport.send(payload);
    }

    /// Emit an independent custom event.
    pub fn track(&self, name: &str, properties: BTreeMap<String, PropertyValue>) {
        let payload = self.payload(EVENT_TYPE_CUSTOM, Some(name.to_string()), properties);
        self.transport.send(payload);
    }

    /// Fill the pending end-of-session slot, replacing any earlier entry.
    pub fn set_pending(&self, name: &str, properties: BTreeMap<String, PropertyValue>) {
        let payload = self.payload(EVENT_TYPE_CUSTOM, Some(name.to_string()), properties);
        if lock(&self.pending).replace(payload).is_some() {
            debug!("Pending collector event replaced");
        }
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Flush the pending event, if any, with a teardown-safe beacon.
    ///
    /// The event is stamped at flush time, not when the slot was filled, so a
    /// long-lived session does not age past the server's acceptance window.
    pub fn page_hidden(&self) {
        if let Some(mut payload) = lock(&self.pending).take() {
            payload.timestamp = Some(Utc::now());
            self.transport.beacon(payload);
        }
    }
}

/// Beacon timeout plus headroom for connection setup.
const TEARDOWN_GRACE: Duration = Duration::from_secs(BEACON_TIMEOUT.as_secs() + 1);

impl Drop for Collector {
    /// Flushes the pending event and waits for it, bounded by
    /// `TEARDOWN_GRACE`, so a process exiting right after the drop still
    /// delivers it.
    fn drop(&mut self) {
        self.page_hidden();
        self.transport.flush(TEARDOWN_GRACE);
    }
}
