#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use veilstat_core::config::{Config, IngestLimits};
use veilstat_duckdb::DuckDbBackend;
use veilstat_server::app::build_app;
use veilstat_server::state::AppState;

pub const SITE: &str = "S1";
pub const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) VeilstatTest/1.0";

/// Build a test Config with sensible defaults for integration tests.
pub fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/veilstat-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        cors_origins: vec![],
        api_token: None,
        salt_ttl_secs: 86_400,
        salt_maintenance_interval_secs: 300,
        ingest: IngestLimits::default(),
        query_timeout_ms: 10_000,
        site_cache_ttl_secs: 60,
    }
}

/// Fresh in-memory backend with site `S1` seeded.
pub async fn setup_with(config: Config) -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    db.seed_site(SITE, "example.com").await.expect("seed site");
    let state = Arc::new(AppState::new(db, config));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

pub async fn setup() -> (Arc<AppState>, axum::Router) {
    setup_with(test_config()).await
}

pub fn collect_request(body: &Value, ip: &str, user_agent: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/collect")
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .header("user-agent", user_agent)
        .body(Body::from(body.to_string()))
        .expect("build request")
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("build request")
}

pub async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
