mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use serde_json::json;

use common::{collect_request, get_request, send, setup, setup_with, test_config, SITE, UA};
use veilstat_core::analytics::{
    AnalyticsBackend, CountGrouping, CountsResult, Funnel, FunnelReport, PropertyAggregate,
    PropertyDefinition, PropertyOperation, StatsQuery, StepType,
};
use veilstat_core::event::{Event, PropertyValue};
use veilstat_duckdb::{CreateFunnelStep, DuckDbBackend};
use veilstat_server::{app::build_app, state::AppState};

fn stored_event(id: &str, visitor: &str, kind: &str, target: &str, minute: u32) -> Event {
    let (event_type, event_name, path) = if kind == "pageview" {
        ("pageview", None, target.to_string())
    } else {
        ("event", Some(target.to_string()), "/".to_string())
    };
    Event {
        id: id.to_string(),
        site_id: SITE.to_string(),
        visitor_id: visitor.to_string(),
        event_type: event_type.to_string(),
        event_name,
        path,
        useragent: None,
        properties: BTreeMap::new(),
        created_at: Utc
            .with_ymd_and_hms(2026, 3, 1, 10, minute, 0)
            .single()
            .expect("valid time"),
    }
}

fn step(step_type: StepType, value: &str) -> CreateFunnelStep {
    CreateFunnelStep {
        step_type,
        match_value: value.to_string(),
        match_operator: None,
        label: None,
    }
}

#[tokio::test]
async fn test_counts_by_path_and_event() {
    let (_state, app) = setup().await;
    for (kind, target) in [("pageview", "/home"), ("pageview", "/pricing"), ("event", "signup_click")] {
        let body = if kind == "pageview" {
            json!({ "siteId": SITE, "type": "pageview", "path": target })
        } else {
            json!({ "siteId": SITE, "type": "event", "name": target, "path": "/pricing" })
        };
        let (status, _) = send(&app, collect_request(&body, "198.51.100.4", UA)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, json) = send(&app, get_request("/api/sites/S1/counts", None)).await;
    assert_eq!(status, StatusCode::OK);
    let rows = json["data"]["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "/home");
    assert_eq!(rows[0]["count"], 1);
    assert_eq!(rows[1]["name"], "/pricing");
    assert_eq!(json["data"]["grouping"], "path");

    let (status, json) = send(&app, get_request("/api/sites/S1/counts?group=event", None)).await;
    assert_eq!(status, StatusCode::OK);
    let rows = json["data"]["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "signup_click");
    assert_eq!(rows[0]["visitors"], 1);
}

#[tokio::test]
async fn test_counts_respect_date_range() {
    let (state, app) = setup().await;
    state
        .db
        .insert_event(&stored_event("e1", "v1", "pageview", "/home", 0))
        .await
        .expect("insert");

    let (_, inside) = send(
        &app,
        get_request("/api/sites/S1/counts?start_date=2026-03-01&end_date=2026-03-01", None),
    )
    .await;
    assert_eq!(inside["data"]["total"], 1);

    let (status, outside) = send(
        &app,
        get_request("/api/sites/S1/counts?start_date=2026-03-02&end_date=2026-03-05", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outside["data"]["total"], 0);
    assert_eq!(outside["data"]["rows"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let (_state, app) = setup().await;
    let (status, json) = send(
        &app,
        get_request("/api/sites/S1/counts?start_date=2026-03-05&end_date=2026-03-01", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_half_open_range_is_rejected() {
    let (_state, app) = setup().await;
    let (status, _) = send(&app, get_request("/api/sites/S1/counts?start_date=2026-03-05", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_grouping_is_rejected() {
    let (_state, app) = setup().await;
    let (status, _) = send(&app, get_request("/api/sites/S1/counts?group=browser", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_site_query_is_not_found() {
    let (_state, app) = setup().await;
    let (status, json) = send(&app, get_request("/api/sites/S9/counts", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_property_aggregates_distinguish_no_data() {
    let (state, app) = setup().await;
    state
        .db
        .declare_property(SITE, "amount", PropertyOperation::Sum)
        .await
        .expect("declare amount");
    state
        .db
        .declare_property(SITE, "coupon", PropertyOperation::Count)
        .await
        .expect("declare coupon");
    for amount in [10.0, 15.5] {
        let body = json!({
            "siteId": SITE,
            "type": "event",
            "name": "purchase",
            "path": "/checkout",
            "properties": { "amount": amount }
        });
        send(&app, collect_request(&body, "198.51.100.4", UA)).await;
    }

    let (status, json) = send(&app, get_request("/api/sites/S1/properties", None)).await;

    assert_eq!(status, StatusCode::OK);
    let data = json["data"].as_array().expect("aggregates");
    let amount = data.iter().find(|a| a["name"] == "amount").expect("amount");
    assert_eq!(amount["status"], "value");
    assert_eq!(amount["value"], 25.5);
    assert_eq!(amount["observations"], 2);
    let coupon = data.iter().find(|a| a["name"] == "coupon").expect("coupon");
    assert_eq!(coupon["status"], "no_data");
    assert!(coupon.get("value").is_none());
}

#[tokio::test]
async fn test_property_filter_narrows_counts() {
    let (_state, app) = setup().await;
    for plan in ["pro", "free", "pro"] {
        let body = json!({
            "siteId": SITE,
            "type": "event",
            "name": "upgrade",
            "path": "/billing",
            "properties": { "plan": plan }
        });
        send(&app, collect_request(&body, "198.51.100.4", UA)).await;
    }

    let (status, json) = send(
        &app,
        get_request(
            "/api/sites/S1/counts?group=event&property_key=plan&property_value=pro",
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["rows"][0]["count"], 2);
}

#[tokio::test]
async fn test_property_catalog_reports_provenance() {
    let (state, app) = setup().await;
    state
        .db
        .declare_property(SITE, "amount", PropertyOperation::Average)
        .await
        .expect("declare amount");
    state
        .db
        .declare_property(SITE, "coupon", PropertyOperation::Count)
        .await
        .expect("declare coupon");
    let mut event = stored_event("e1", "v1", "event", "purchase", 0);
    event
        .properties
        .insert("amount".to_string(), PropertyValue::Number(9.0));
    event
        .properties
        .insert("referrer".to_string(), PropertyValue::from("newsletter"));
    state.db.insert_event(&event).await.expect("insert");

    let (status, json) = send(&app, get_request("/api/sites/S1/properties/catalog", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["data"],
        json!([
            { "name": "amount", "provenance": "both", "operation": "average" },
            { "name": "coupon", "provenance": "declared", "operation": "count" },
            { "name": "referrer", "provenance": "observed", "operation": null }
        ])
    );
}

#[tokio::test]
async fn test_funnel_report_counts_ordered_progress() {
    let (state, app) = setup().await;
    let funnel = state
        .db
        .create_funnel(
            SITE,
            "Signup",
            vec![
                step(StepType::PageView, "/home"),
                step(StepType::PageView, "/pricing"),
                step(StepType::Event, "signup_click"),
            ],
        )
        .await
        .expect("create funnel");

    // v1 completes; v2 stops after /pricing; v3 does the steps out of order.
    let events = [
        stored_event("a1", "v1", "pageview", "/home", 0),
        stored_event("a2", "v1", "pageview", "/pricing", 1),
        stored_event("a3", "v1", "event", "signup_click", 2),
        stored_event("b1", "v2", "pageview", "/home", 0),
        stored_event("b2", "v2", "pageview", "/pricing", 3),
        stored_event("c1", "v3", "pageview", "/pricing", 0),
        stored_event("c2", "v3", "pageview", "/home", 5),
    ];
    for event in &events {
        state.db.insert_event(event).await.expect("insert");
    }

    let uri = format!("/api/sites/S1/funnels/{}", funnel.id);
    let (status, json) = send(&app, get_request(&uri, None)).await;

    assert_eq!(status, StatusCode::OK);
    let report = &json["data"];
    assert_eq!(report["total_visitors_entered"], 3);
    let visitors: Vec<i64> = report["steps"]
        .as_array()
        .expect("steps")
        .iter()
        .map(|s| s["visitors"].as_i64().expect("visitors"))
        .collect();
    assert_eq!(visitors, vec![3, 2, 1]);
    let final_rate = report["final_conversion_rate"].as_f64().expect("rate");
    assert!((final_rate - 1.0 / 3.0).abs() < 1e-9);

    let (status, json) = send(&app, get_request("/api/sites/S1/funnels", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"][0]["id"], funnel.id);
    assert_eq!(json["data"][0]["steps"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn test_unknown_funnel_is_not_found() {
    let (_state, app) = setup().await;
    let (status, _) = send(&app, get_request("/api/sites/S1/funnels/fun_missing", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dashboard_requires_configured_token() {
    let mut config = test_config();
    config.api_token = Some("s3cret".to_string());
    let (_state, app) = setup_with(config).await;

    let (status, json) = send(&app, get_request("/api/sites/S1/counts", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "unauthorized");

    let (status, _) = send(&app, get_request("/api/sites/S1/counts", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, get_request("/api/sites/S1/counts", Some("s3cret"))).await;
    assert_eq!(status, StatusCode::OK);

    // Collection stays open regardless of the token.
    let body = json!({ "siteId": SITE, "type": "pageview", "path": "/" });
    let (status, _) = send(&app, collect_request(&body, "198.51.100.4", UA)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

fn rotate_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/api/admin/salt/rotate");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

#[tokio::test]
async fn test_admin_routes_hidden_without_token() {
    let (_state, app) = setup().await;
    let (status, _) = send(&app, rotate_request(None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_salt_rotation_changes_visitor_identity() {
    let mut config = test_config();
    config.api_token = Some("s3cret".to_string());
    let (state, app) = setup_with(config).await;
    let body = json!({ "siteId": SITE, "type": "pageview", "path": "/home" });

    send(&app, collect_request(&body, "198.51.100.4", UA)).await;
    let (status, json) = send(&app, rotate_request(Some("s3cret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["rotated"], true);
    assert!(json["data"].get("value").is_none());
    send(&app, collect_request(&body, "198.51.100.4", UA)).await;

    let events = state.db.list_events(SITE).await.expect("list");
    assert_eq!(events.len(), 2);
    assert_ne!(events[0].visitor_id, events[1].visitor_id);
}

/// Delegates to DuckDB but stalls every count query.
struct SlowAnalytics {
    inner: Arc<DuckDbBackend>,
    delay: Duration,
}

#[async_trait]
impl AnalyticsBackend for SlowAnalytics {
    async fn insert_event(&self, event: &Event) -> anyhow::Result<()> {
        self.inner.insert_event(event).await
    }

    async fn get_counts(
        &self,
        query: &StatsQuery,
        grouping: CountGrouping,
    ) -> anyhow::Result<CountsResult> {
        tokio::time::sleep(self.delay).await;
        AnalyticsBackend::get_counts(self.inner.as_ref(), query, grouping).await
    }

    async fn get_property_aggregates(
        &self,
        query: &StatsQuery,
        definitions: &[PropertyDefinition],
    ) -> anyhow::Result<Vec<PropertyAggregate>> {
        AnalyticsBackend::get_property_aggregates(self.inner.as_ref(), query, definitions).await
    }

    async fn get_funnel_report(
        &self,
        query: &StatsQuery,
        funnel: &Funnel,
    ) -> anyhow::Result<FunnelReport> {
        AnalyticsBackend::get_funnel_report(self.inner.as_ref(), query, funnel).await
    }

    async fn observed_property_keys(&self, site_id: &str) -> anyhow::Result<Vec<String>> {
        AnalyticsBackend::observed_property_keys(self.inner.as_ref(), site_id).await
    }
}

#[tokio::test]
async fn test_slow_query_times_out() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    db.seed_site(SITE, "example.com").await.expect("seed");
    let mut config = test_config();
    config.query_timeout_ms = 20;
    let slow = Arc::new(SlowAnalytics {
        inner: db.clone(),
        delay: Duration::from_secs(2),
    });
    let state = Arc::new(AppState::with_providers(
        db.clone(),
        slow,
        db.clone(),
        db.clone(),
        config,
    ));
    let app = build_app(state);

    let (status, json) = send(&app, get_request("/api/sites/S1/counts", None)).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["error"]["code"], "query_timeout");
}
