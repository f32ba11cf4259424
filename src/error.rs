//! Service-wide error taxonomy.
//!
//! Every failure converges on [`ServiceError`], which carries a stable code
//! string for API payloads. Recoverable faults (a single remote call, a
//! single variant failing OCR) are absorbed at the call site and never reach
//! this type; whatever does reach it is either surfaced to the caller or
//! becomes the terminal state of a job.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unrecognized magic bytes, out-of-range dimensions or size, or a
    /// decode failure. Surfaced with a 400-class status.
    #[error("bad image: {0}")]
    BadImage(String),

    /// Malformed identifiers, suspicious headers, invalid export format.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("not found")]
    NotFound,

    /// Both primary OCR and (when permitted) the vision fallback failed to
    /// produce a usable result.
    #[error("ocr failed: {0}")]
    Ocr(String),

    /// A remote collaborator (catalogue, vision provider, cache backend)
    /// failed and local recovery was not possible.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Fallback attempted while the circuit is open. Never surfaced to the
    /// caller; the pipeline continues with primary-only results.
    #[error("vision fallback circuit is open")]
    CircuitOpen,

    #[error("pipeline exceeded the {0}s execution limit")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code used in API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::BadImage(_) => "BAD_IMAGE",
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::RateLimited { .. } => "RATE_LIMITED",
            ServiceError::NotFound => "NOT_FOUND",
            ServiceError::Ocr(_) => "OCR_ERROR",
            ServiceError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            ServiceError::CircuitOpen => "CIRCUIT_OPEN",
            ServiceError::Timeout(_) => "TIMEOUT",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for errors whose result must never be cached at the idempotency
    /// layer.
    pub fn is_terminal_failure(&self) -> bool {
        !matches!(self, ServiceError::RateLimited { .. })
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Internal(format!("io error: {err}"))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(format!("serialization error: {err}"))
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(err: rusqlite::Error) -> Self {
        ServiceError::Internal(format!("catalogue store error: {err}"))
    }
}

impl From<image::ImageError> for ServiceError {
    fn from(err: image::ImageError) -> Self {
        ServiceError::BadImage(format!("decode failure: {err}"))
    }
}
