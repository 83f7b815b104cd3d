use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use veilstat_core::error::QueryError;

use crate::{error::AppError, routes::query::StatsParams, state::AppState};

/// `GET /api/sites/{site_id}/funnels`: funnel definitions for a site.
#[tracing::instrument(skip(state))]
pub async fn list_funnels(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.require_site(&site_id).await?;
    let funnels = state
        .sites
        .list_funnels(&site_id)
        .await
        .map_err(QueryError::from)?;
    Ok(Json(json!({ "data": funnels })))
}

/// `GET /api/sites/{site_id}/funnels/{funnel_id}`: per-step visitor counts
/// and conversion for one funnel.
#[tracing::instrument(skip(state, params))]
pub async fn get_funnel_report(
    State(state): State<Arc<AppState>>,
    Path((site_id, funnel_id)): Path<(String, String)>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.into_query(&site_id)?;
    state.require_site(&site_id).await?;

    let funnel = state
        .sites
        .get_funnel(&site_id, &funnel_id)
        .await
        .map_err(QueryError::from)?
        .ok_or_else(|| QueryError::UnknownFunnel(funnel_id.clone()))?;
    let report = state
        .run_query(state.analytics.get_funnel_report(&query, &funnel))
        .await?;
    Ok(Json(json!({ "data": report })))
}
