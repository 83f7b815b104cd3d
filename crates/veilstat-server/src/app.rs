use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth, routes, state::AppState};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `CorsLayer`: the collector runs on third-party pages, so the collect
///    endpoint needs CORS headers. Restricted to `config.cors_origins` when
///    any are configured.
/// 2. `TraceLayer`: structured request/response logging via `tracing`.
///
/// Dashboard routes sit behind [`auth::require_token`]; admin routes behind
/// [`auth::require_admin_token`].
pub fn build_app(state: Arc<AppState>) -> Router {
    let dashboard = Router::new()
        .route("/api/sites/{site_id}/counts", get(routes::stats::get_counts))
        .route(
            "/api/sites/{site_id}/properties",
            get(routes::stats::get_property_aggregates),
        )
        .route(
            "/api/sites/{site_id}/properties/catalog",
            get(routes::stats::get_property_catalog),
        )
        .route(
            "/api/sites/{site_id}/funnels",
            get(routes::funnels::list_funnels),
        )
        .route(
            "/api/sites/{site_id}/funnels/{funnel_id}",
            get(routes::funnels::get_funnel_report),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_token,
        ));

    let admin = Router::new()
        .route("/api/admin/salt/rotate", post(routes::salt::rotate_salt))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_admin_token,
        ));

    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/collect", post(routes::collect::collect))
        .merge(dashboard)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
