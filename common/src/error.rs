use thiserror::Error;

/// Shared error kinds crossing component boundaries.
///
/// Each crate keeps its own leaf error enum for local detail and converts
/// into this one at the boundary (Store calls, RPCs, WS handlers) so
/// callers can map to the dispositions in spec §7 without matching on
/// crate-specific variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("persistent failure: {0}")]
    PersistentFailure(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Stable error code for WS error frames / HTTP JSON bodies (§7).
    pub fn code(&self) -> &'static str {
        match self {
            AppError::TransientUpstream(_) => "SERVICE_UNAVAILABLE",
            AppError::AuthFailed(_) => "AUTH_FAILED",
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::Conflict(_) => "CONFLICT",
            AppError::NotReady(_) => "NOT_READY",
            AppError::PersistentFailure(_) => "PERSISTENT_FAILURE",
            AppError::CircuitOpen(_) => "CIRCUIT_OPEN",
            AppError::NotFound(_) => "NOT_FOUND",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AppError::TransientUpstream(_) => 503,
            AppError::AuthFailed(_) => 401,
            AppError::InvalidRequest(_) => 400,
            AppError::Conflict(_) => 409,
            AppError::NotReady(_) => 503,
            AppError::PersistentFailure(_) => 500,
            AppError::CircuitOpen(_) => 503,
            AppError::NotFound(_) => 404,
        }
    }
}
