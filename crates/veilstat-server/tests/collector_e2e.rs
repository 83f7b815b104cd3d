mod common;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use common::{get_request, send, SITE};
use veilstat_collector::{Collector, CollectorConfig};
use veilstat_core::analytics::StepType;
use veilstat_core::event::PropertyValue;
use veilstat_duckdb::{CreateFunnelStep, DuckDbBackend};
use veilstat_server::{app::build_app, state::AppState};

async fn serve() -> (Arc<AppState>, axum::Router, SocketAddr) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    db.seed_site(SITE, "example.com").await.expect("seed site");
    let state = Arc::new(AppState::new(db, common::test_config()));
    let app = build_app(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let service = app.clone().into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, service).await.expect("serve");
    });
    (state, app, addr)
}

async fn wait_for_events(db: &DuckDbBackend, expected: i64) -> i64 {
    let mut seen = 0;
    for _ in 0..100 {
        seen = db.count_events(SITE).await.expect("count");
        if seen >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    seen
}

// ============================================================
// BDD: A browsing session reaches the store and the reports
// ============================================================
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_collector_session_is_reported() {
    let (state, app, addr) = serve().await;
    let funnel = state
        .db
        .create_funnel(
            SITE,
            "Signup",
            vec![
                CreateFunnelStep {
                    step_type: StepType::PageView,
                    match_value: "/home".to_string(),
                    match_operator: None,
                    label: Some("Landing".to_string()),
                },
                CreateFunnelStep {
                    step_type: StepType::PageView,
                    match_value: "/pricing".to_string(),
                    match_operator: None,
                    label: None,
                },
                CreateFunnelStep {
                    step_type: StepType::Event,
                    match_value: "signup_click".to_string(),
                    match_operator: None,
                    label: None,
                },
            ],
        )
        .await
        .expect("create funnel");

    let mut config = CollectorConfig::new(format!("http://{addr}"), SITE);
    config.user_agent = Some("VeilstatCollectorTest/1.0".to_string());
    let collector = Collector::start_http(config).expect("collector starts");

    collector.page_loaded("/home");
    tokio::time::sleep(Duration::from_millis(5)).await;
    collector.page_loaded("/pricing");
    let mut properties = BTreeMap::new();
    properties.insert("plan".to_string(), PropertyValue::from("pro"));
    collector.set_pending("signup_click", properties);
    assert!(collector.has_pending());
    collector.page_hidden();
    assert!(!collector.has_pending());

    assert_eq!(wait_for_events(&state.db, 3).await, 3);
    drop(collector);

    let events = state.db.list_events(SITE).await.expect("list");
    assert!(events.iter().all(|e| e.visitor_id == events[0].visitor_id));
    let signup = events
        .iter()
        .find(|e| e.event_name.as_deref() == Some("signup_click"))
        .expect("signup event");
    assert_eq!(signup.path, "/pricing");
    assert_eq!(
        signup.properties.get("plan"),
        Some(&PropertyValue::from("pro"))
    );

    let (status, json) = send(&app, get_request("/api/sites/S1/counts", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total"], 2);
    assert_eq!(
        json["data"]["rows"],
        serde_json::json!([
            { "name": "/home", "count": 1, "visitors": 1 },
            { "name": "/pricing", "count": 1, "visitors": 1 }
        ])
    );

    let (status, json) = send(&app, get_request("/api/sites/S1/counts?group=event", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["data"]["rows"],
        serde_json::json!([{ "name": "signup_click", "count": 1, "visitors": 1 }])
    );

    let uri = format!("/api/sites/S1/funnels/{}", funnel.id);
    let (status, json) = send(&app, get_request(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total_visitors_entered"], 1);
    assert_eq!(json["data"]["final_conversion_rate"], 1.0);
    assert_eq!(json["data"]["steps"][0]["label"], "Landing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_collector_for_unknown_site_stores_nothing() {
    let (state, _app, addr) = serve().await;
    let collector =
        Collector::start_http(CollectorConfig::new(format!("http://{addr}"), "S9")).expect("start");

    collector.page_loaded("/home");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(state.db.count_events("S9").await.expect("count"), 0);
    assert_eq!(state.db.count_events(SITE).await.expect("count"), 0);
}
