//! Error types shared across the corridor engine.

use thiserror::Error;

/// Result type alias using [`RoamError`].
pub type RoamResult<T> = Result<T, RoamError>;

/// Primary error type for corridor-engine operations.
///
/// Variants are grouped by the HTTP-shaped taxonomy the engine exposes at
/// its boundaries: bad request, not found, service unavailable.
#[derive(Debug, Error)]
pub enum RoamError {
    // === Bad request ===
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("invalid parameter '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    // === Not found ===
    #[error("not found: {0}")]
    NotFound(String),

    #[error("asset missing from bundle: {0}")]
    AssetMissing(String),

    // === Service unavailable ===
    #[error("upstream service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    // === Storage / internal ===
    #[error("storage error: {0}")]
    StorageError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl RoamError {
    /// Stable machine-readable code, carried in API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RoamError::BadRequest(_) => "bad_request",
            RoamError::InvalidParameter { .. } => "invalid_parameter",
            RoamError::NotFound(_) => "not_found",
            RoamError::AssetMissing(_) => "asset_missing",
            RoamError::ServiceUnavailable(_) => "service_unavailable",
            RoamError::Timeout(_) => "timeout",
            RoamError::StorageError(_) => "storage_error",
            RoamError::InternalError(_) => "internal_error",
        }
    }

    /// HTTP status code this error maps onto.
    pub fn http_status_code(&self) -> u16 {
        match self {
            RoamError::BadRequest(_) | RoamError::InvalidParameter { .. } => 400,
            RoamError::NotFound(_) | RoamError::AssetMissing(_) => 404,
            RoamError::ServiceUnavailable(_) | RoamError::Timeout(_) => 503,
            RoamError::StorageError(_) | RoamError::InternalError(_) => 500,
        }
    }
}

impl From<serde_json::Error> for RoamError {
    fn from(err: serde_json::Error) -> Self {
        RoamError::InternalError(format!("json error: {err}"))
    }
}

impl From<std::io::Error> for RoamError {
    fn from(err: std::io::Error) -> Self {
        RoamError::InternalError(format!("io error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(RoamError::BadRequest("x".into()).http_status_code(), 400);
        assert_eq!(RoamError::NotFound("x".into()).http_status_code(), 404);
        assert_eq!(
            RoamError::ServiceUnavailable("x".into()).http_status_code(),
            503
        );
    }
}
