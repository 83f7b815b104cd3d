use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use veilstat_core::error::{IngestError, QueryError, ValidationError};

/// Application-level errors that map directly to HTTP responses.
///
/// Every variant implements [`IntoResponse`] so Axum handlers can use
/// `Result<impl IntoResponse, AppError>` as their return type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A backing store could not be reached. Transient.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("query timed out after {0} ms")]
    Timeout(u64),
}

impl From<IngestError> for AppError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::Validation(e) => AppError::Validation(e),
            IngestError::Unavailable(msg) => AppError::Unavailable(msg),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::InvalidRange(msg) | QueryError::InvalidQuery(msg) => {
                AppError::BadRequest(msg)
            }
            QueryError::UnknownSite(id) => AppError::NotFound(format!("Unknown site: {id}")),
            QueryError::UnknownFunnel(id) => AppError::NotFound(format!("Unknown funnel: {id}")),
            QueryError::Timeout(ms) => AppError::Timeout(ms),
            QueryError::Unavailable(e) => AppError::Unavailable(e.to_string()),
        }
    }
}

fn envelope(status: StatusCode, code: &str, message: &str, field: Option<&str>) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message,
                "field": field
            }
        })),
    )
        .into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::NotFound(msg) => envelope(StatusCode::NOT_FOUND, "not_found", msg, None),
            AppError::BadRequest(msg) => {
                envelope(StatusCode::BAD_REQUEST, "validation_error", msg, None)
            }
            AppError::Unauthorized => envelope(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Not authenticated",
                None,
            ),
            AppError::Validation(e) => {
                let status = match e {
                    ValidationError::UnknownSite(_) => StatusCode::NOT_FOUND,
                    ValidationError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                envelope(status, e.code(), &e.to_string(), e.field())
            }
            AppError::Unavailable(msg) => {
                tracing::error!("Backing store unavailable: {msg}");
                envelope(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "Service temporarily unavailable, retry later",
                    None,
                )
            }
            AppError::Timeout(ms) => {
                tracing::warn!(timeout_ms = ms, "Query timed out");
                envelope(
                    StatusCode::GATEWAY_TIMEOUT,
                    "query_timeout",
                    "Query did not finish in time",
                    None,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_client_statuses() {
        let cases = [
            (
                AppError::from(ValidationError::UnknownSite("S9".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::from(ValidationError::PayloadTooLarge(16)),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                AppError::from(ValidationError::TimestampTooOld),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn query_errors_map_to_statuses() {
        assert_eq!(
            AppError::from(QueryError::Timeout(10)).into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::from(QueryError::UnknownFunnel("f".into()))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(IngestError::Unavailable("salt".into()))
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn storage_failures_are_unavailable_not_internal() {
        let error = AppError::from(QueryError::Unavailable(anyhow::anyhow!("db closed")));
        assert_eq!(error.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
