//! Lucid Error Types
//!
//! Centralized error handling. Infrastructure failures use `LucidError`;
//! the request taxonomy seen by callers is `ExplainError`, and each provider
//! reports a `ProviderError` that the orchestrator recovers from.

use crate::core::ExplanationResult;
use thiserror::Error;

/// Central error type for Lucid infrastructure
#[derive(Error, Debug)]
pub enum LucidError {
    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Lucid operations
pub type LucidResult<T> = Result<T, LucidError>;

/// Helper to convert Mutex poison errors
impl<T> From<std::sync::PoisonError<T>> for LucidError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        LucidError::Lock(err.to_string())
    }
}

/// Failure of a persistent backing store (consent file, state database)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage unreadable: {0}")]
    Unreadable(String),

    #[error("storage write failed: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Typed failure of a single provider call. Never surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{0}: rate limited by remote")]
    RateLimited(String),

    #[error("{0}: no credential configured")]
    AuthMissing(String),

    #[error("{0}: credential rejected")]
    AuthRejected(String),

    #[error("{0}: network failure: {1}")]
    NetworkFailure(String, String),

    #[error("{0}: invalid response: {1}")]
    InvalidResponse(String, String),
}

impl ProviderError {
    /// Name of the provider that produced this error
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::RateLimited(p)
            | ProviderError::AuthMissing(p)
            | ProviderError::AuthRejected(p)
            | ProviderError::NetworkFailure(p, _)
            | ProviderError::InvalidResponse(p, _) => p,
        }
    }

    /// Short machine-readable class, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::AuthMissing(_) => "auth_missing",
            ProviderError::AuthRejected(_) => "auth_rejected",
            ProviderError::NetworkFailure(..) => "network_failure",
            ProviderError::InvalidResponse(..) => "invalid_response",
        }
    }
}

/// Terminal outcomes of an explanation request
#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No consent to send text anywhere. Carries the local explanation so
    /// the caller can still show something next to the consent prompt.
    #[error("consent required before text can leave the device")]
    ConsentDenied { local: ExplanationResult },

    #[error("request cancelled")]
    Cancelled,
}

impl ExplainError {
    /// Wire code used in `ExplainResponse::error`
    pub fn code(&self) -> &'static str {
        match self {
            ExplainError::InvalidInput(_) => "invalid_input",
            ExplainError::ConsentDenied { .. } => "consent_required",
            ExplainError::Cancelled => "cancelled",
        }
    }
}
