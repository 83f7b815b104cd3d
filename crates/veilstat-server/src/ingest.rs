//! The write path: validate, identify, persist, acknowledge.

use chrono::Utc;
use tracing::debug;

use veilstat_core::{
    error::{IngestError, ValidationError},
    event::{Ack, CollectPayload},
    ingest::validate_payload,
    visitor::identify,
};

use crate::state::AppState;

/// Transport-level facts about the sender. Used only to derive the
/// pseudo-identity; never stored or logged.
#[derive(Clone, Default)]
pub struct ClientContext {
    pub address: String,
    /// The `User-Agent` request header, when present.
    pub user_agent: Option<String>,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext").finish_non_exhaustive()
    }
}

/// Record one event.
///
/// Either the event is durably stored and acknowledged, or an error is
/// returned and nothing was written.
pub async fn record(
    state: &AppState,
    payload: CollectPayload,
    client: &ClientContext,
) -> Result<Ack, IngestError> {
    let validated = validate_payload(payload, &state.config.ingest, Utc::now())?;

    let active = state
        .is_active_site(&validated.site_id)
        .await
        .map_err(|e| IngestError::Unavailable(format!("site lookup failed: {e}")))?;
    if !active {
        return Err(ValidationError::UnknownSite(validated.site_id).into());
    }

    let salt = state
        .salts
        .current_salt()
        .await
        .map_err(|e| IngestError::Unavailable(e.to_string()))?;

    let user_agent = client
        .user_agent
        .as_deref()
        .or(validated.useragent.as_deref())
        .unwrap_or("");
    let visitor_id = identify(&validated.site_id, &client.address, user_agent, &salt);

    let event = validated.into_event(visitor_id);
    state
        .analytics
        .insert_event(&event)
        .await
        .map_err(|e| IngestError::Unavailable(format!("event store write failed: {e}")))?;

    debug!(
        site_id = %event.site_id,
        event_type = %event.event_type,
        "Event recorded"
    );
    Ok(Ack::for_event(&event))
}
