use thiserror::Error;

/// A client-caused rejection of an incoming event. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unknown or inactive site: {0}")]
    UnknownSite(String),

    #[error("unsupported event type: {0}")]
    InvalidType(String),

    #[error("custom events require a non-empty name")]
    MissingName,

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} exceeds {max} bytes")]
    TooLong { field: &'static str, max: usize },

    #[error("timestamp is too far in the future")]
    TimestampInFuture,

    #[error("timestamp is too old")]
    TimestampTooOld,

    #[error("too many properties: {count} (max {max})")]
    TooManyProperties { count: usize, max: usize },

    #[error("invalid property key: {0}")]
    InvalidPropertyKey(String),

    #[error("property {0} must be a string or a finite number")]
    NonScalarProperty(String),

    #[error("payload exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

impl ValidationError {
    /// Stable machine-readable code used in the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Malformed(_) => "malformed_payload",
            ValidationError::UnknownSite(_) => "unknown_site",
            ValidationError::InvalidType(_) => "invalid_type",
            ValidationError::MissingName => "missing_name",
            ValidationError::Empty { .. } => "empty_field",
            ValidationError::TooLong { .. } => "field_too_long",
            ValidationError::TimestampInFuture => "timestamp_in_future",
            ValidationError::TimestampTooOld => "timestamp_too_old",
            ValidationError::TooManyProperties { .. } => "too_many_properties",
            ValidationError::InvalidPropertyKey(_) => "invalid_property_key",
            ValidationError::NonScalarProperty(_) => "non_scalar_property",
            ValidationError::PayloadTooLarge(_) => "payload_too_large",
        }
    }

    /// The offending wire field, when one can be named.
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::UnknownSite(_) => Some("siteId"),
            ValidationError::InvalidType(_) => Some("type"),
            ValidationError::MissingName => Some("name"),
            ValidationError::Empty { field } | ValidationError::TooLong { field, .. } => {
                Some(*field)
            }
            ValidationError::TimestampInFuture | ValidationError::TimestampTooOld => {
                Some("timestamp")
            }
            ValidationError::TooManyProperties { .. }
            | ValidationError::InvalidPropertyKey(_)
            | ValidationError::NonScalarProperty(_) => Some("properties"),
            ValidationError::Malformed(_) | ValidationError::PayloadTooLarge(_) => None,
        }
    }
}

/// Failure of the ingestion path.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Salt store or event store unreachable. Transient; the client may retry.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Failure of an aggregation query. Always surfaced to the caller, never
/// folded into an empty result.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unknown site: {0}")]
    UnknownSite(String),

    #[error("unknown funnel: {0}")]
    UnknownFunnel(String),

    #[error("query timed out after {0} ms")]
    Timeout(u64),

    #[error("unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}
