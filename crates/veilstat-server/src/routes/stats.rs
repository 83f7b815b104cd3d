use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use veilstat_core::{
    analytics::CountGrouping, error::QueryError, properties::reconcile_catalog,
};

use crate::{error::AppError, routes::query::StatsParams, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CountsParams {
    pub group: Option<String>,
    #[serde(flatten)]
    pub stats: StatsParams,
}

/// `GET /api/sites/{site_id}/counts`: pageviews by path or custom events by
/// name, ordered by count desc then name asc.
#[tracing::instrument(skip(state, params))]
pub async fn get_counts(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(params): Query<CountsParams>,
) -> Result<impl IntoResponse, AppError> {
    let grouping = CountGrouping::parse(params.group.as_deref())?;
    let query = params.stats.into_query(&site_id)?;
    state.require_site(&site_id).await?;

    let result = state
        .run_query(state.analytics.get_counts(&query, grouping))
        .await?;
    Ok(Json(json!({ "data": result })))
}

/// `GET /api/sites/{site_id}/properties`: aggregates for every declared
/// property. A property with no observations reports `no_data`.
#[tracing::instrument(skip(state, params))]
pub async fn get_property_aggregates(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.into_query(&site_id)?;
    state.require_site(&site_id).await?;

    let definitions = state
        .sites
        .list_property_definitions(&site_id)
        .await
        .map_err(QueryError::from)?;
    let aggregates = state
        .run_query(state.analytics.get_property_aggregates(&query, &definitions))
        .await?;
    Ok(Json(json!({ "data": aggregates })))
}

/// `GET /api/sites/{site_id}/properties/catalog`: declared and observed
/// property names with their provenance.
#[tracing::instrument(skip(state))]
pub async fn get_property_catalog(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.require_site(&site_id).await?;

    let declared = state
        .sites
        .list_property_definitions(&site_id)
        .await
        .map_err(QueryError::from)?;
    let observed = state
        .run_query(state.analytics.observed_property_keys(&site_id))
        .await?;
    Ok(Json(json!({ "data": reconcile_catalog(&declared, &observed) })))
}
