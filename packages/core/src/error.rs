use thiserror::Error;

/// Construction-time contract violations for jobs and workers.
///
/// These are raised before any store call is made and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("type must be a string")]
    InvalidType,

    #[error("payload must be a plain object, got {found}")]
    InvalidPayload { found: &'static str },

    #[error("timeout must be between 1 and {} milliseconds", crate::MAX_TIMEOUT_MS)]
    InvalidTimeout,

    #[error("handler must be a function")]
    MissingHandler,

    #[error("invalid worker config: {0}")]
    InvalidConfig(String),
}
