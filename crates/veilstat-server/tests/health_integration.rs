mod common;

use axum::http::StatusCode;

use common::{get_request, send, setup};

// ============================================================
// BDD: Health check returns 200 when DB is reachable
// ============================================================
#[tokio::test]
async fn test_health_returns_200_when_db_reachable() {
    let (_state, app) = setup().await;

    let (status, json) = send(&app, get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// ============================================================
// BDD: Health stays open when an API token is configured
// ============================================================
#[tokio::test]
async fn test_health_needs_no_token() {
    let mut config = common::test_config();
    config.api_token = Some("s3cret".to_string());
    let (_state, app) = common::setup_with(config).await;

    let (status, _) = send(&app, get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (_state, app) = setup().await;
    let (status, _) = send(&app, get_request("/api/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
