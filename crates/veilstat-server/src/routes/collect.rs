use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use veilstat_core::{error::ValidationError, ingest::parse_payload};

use crate::{
    error::AppError,
    ingest::{record, ClientContext},
    state::AppState,
};

/// `POST /api/collect`: record a single event.
///
/// ## Auth
/// None required. Events for unknown or inactive sites are rejected with 404.
///
/// ## Body
/// JSON regardless of `Content-Type`, so `text/plain` beacons decode the same
/// way as `application/json` posts. Client-supplied identity fields are
/// ignored.
///
/// ## Response
/// `202 Accepted` with `{ "ok": true, "event": { ...canonical... } }`.
#[tracing::instrument(skip(state, request))]
pub async fn collect(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let client = client_context(&request);
    let limit = state.config.ingest.max_body_bytes;

    let body = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| ValidationError::PayloadTooLarge(limit))?;
    let payload = parse_payload(&body, &state.config.ingest)?;

    let ack = record(&state, payload, &client).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

fn client_context(request: &Request) -> ClientContext {
    let headers = request.headers();
    let address = extract_client_ip(headers)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ClientContext {
        address,
        user_agent,
    }
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`.
fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("10.0.0.2"));
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }
}
