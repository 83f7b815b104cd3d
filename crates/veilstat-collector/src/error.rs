use thiserror::Error;

/// Start-up failures. Delivery failures are logged, never returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollectorError {
    #[error("collector configuration missing: {0}")]
    ConfigurationMissing(&'static str),

    #[error("invalid collector endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}
