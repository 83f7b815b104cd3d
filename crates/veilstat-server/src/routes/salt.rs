use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{error::AppError, state::AppState};

/// `POST /api/admin/salt/rotate`: replace the current salt immediately.
///
/// Visitors seen before the rotation get new pseudo-identities afterwards.
/// The salt value itself is never returned.
#[tracing::instrument(skip(state))]
pub async fn rotate_salt(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let salt = state
        .salts
        .rotate()
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    Ok(Json(json!({
        "data": {
            "rotated": true,
            "created_at": salt.created_at,
            "expires_at": salt.expires_at
        }
    })))
}
