use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use url::Url;
use veilstat_core::event::CollectPayload;

use crate::error::CollectorError;

const COLLECT_PATH: &str = "/api/collect";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const BEACON_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_POLL: Duration = Duration::from_millis(10);
const DEFAULT_USER_AGENT: &str = concat!("veilstat-collector/", env!("CARGO_PKG_VERSION"));

/// Both delivery paths present the same `User-Agent`, or the server would
/// derive a different pseudo-identity for the beacon.
fn user_agent(payload: &CollectPayload) -> String {
    payload
        .useragent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
}

/// Delivery of collector payloads.
///
/// Both methods return immediately and swallow every failure.
pub trait Transport: Send + Sync + 'static {
    /// Fire-and-forget delivery for events emitted while the page is alive.
    fn send(&self, payload: CollectPayload);

    /// Delivery that must survive teardown of the caller.
    fn beacon(&self, payload: CollectPayload);

    /// Block until in-flight beacons finish or `grace` elapses.
    fn flush(&self, _grace: Duration) {}
}

/// HTTP transport posting JSON to `<endpoint>/api/collect`.
#[derive(Clone)]
pub struct HttpTransport {
    collect_url: Url,
    client: reqwest::Client,
    beacons: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self, CollectorError> {
        let invalid = |reason: String| CollectorError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };
        let base = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", base.scheme())));
        }
        let collect_url = base.join(COLLECT_PATH).map_err(|e| invalid(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            collect_url,
            client,
            beacons: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn collect_url(&self) -> &Url {
        &self.collect_url
    }
}

impl Transport for HttpTransport {
    fn send(&self, payload: CollectPayload) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime to ride on; the beacon thread delivers just as well.
            self.beacon(payload);
            return;
        };

        let client = self.client.clone();
        let url = self.collect_url.clone();
        let agent = user_agent(&payload);
        handle.spawn(async move {
            let request = client
                .post(url)
                .header(reqwest::header::USER_AGENT, agent)
                .json(&payload);
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        debug!(%status, ack = %body, "Collector event accepted");
                    } else {
                        warn!(%status, "Collector event rejected");
                        debug!(body = %body, "Collector rejection body");
                    }
                }
                Err(error) => warn!(%error, "Collector send failed"),
            }
        });
    }

    fn beacon(&self, payload: CollectPayload) {
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "Collector beacon payload could not be encoded");
                return;
            }
        };
        let url = self.collect_url.to_string();
        let agent = user_agent(&payload);

        let spawned = std::thread::Builder::new()
            .name("veilstat-beacon".to_string())
            .spawn(move || {
                let result = ureq::post(&url)
                    .timeout(BEACON_TIMEOUT)
                    .set("Content-Type", "application/json")
                    .set("User-Agent", &agent)
                    .send_string(&body);
                match result {
                    Ok(response) => debug!(status = response.status(), "Collector beacon delivered"),
                    Err(ureq::Error::Status(status, _)) => {
                        warn!(status, "Collector beacon rejected")
                    }
                    Err(error) => warn!(%error, "Collector beacon failed"),
                }
            });
        match spawned {
            Ok(handle) => {
                let mut beacons = self
                    .beacons
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                beacons.retain(|h| !h.is_finished());
                beacons.push(handle);
            }
            Err(error) => warn!(%error, "Collector beacon thread could not start"),
        }
    }

    fn flush(&self, grace: Duration) {
        let pending: Vec<JoinHandle<()>> = self
            .beacons
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        let deadline = Instant::now() + grace;
        for handle in pending {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(FLUSH_POLL);
            }
            if !handle.is_finished() {
                warn!("Collector beacon still in flight at teardown");
                continue;
            }
            if handle.join().is_err() {
                warn!("Collector beacon thread panicked");
            }
        }
    }
}
