//! Storage gateway error types.

use std::time::Duration;

use thiserror::Error;

/// Error type for storage gateway operations.
///
/// `Clone` because every waiter on a coalesced request receives the same
/// outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    /// Path failed the confinement check. Fix the input; never retried.
    #[error("path rejected: {path}: {reason}")]
    PathRejected { path: String, reason: String },

    /// No credential source is configured.
    #[error("storage credentials unavailable: {message}")]
    AuthUnavailable { message: String },

    /// Refreshing the credential failed.
    #[error("storage credential refresh failed: {message}")]
    AuthRefresh { message: String },

    /// The provider rejected the access token. Out-of-band reconnect needed.
    #[error("storage access token invalid: {message}")]
    AuthTokenInvalid { message: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    /// HTTP 429 after exhausting retries.
    #[error("rate limited by storage provider")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx or transport failure after exhausting retries.
    #[error("storage provider unavailable: {message}")]
    Transient { status: Option<u16>, message: String },

    /// HTTP 409 after exhausting retries.
    #[error("conflict at {path}: {message}")]
    Conflict { path: String, message: String },

    /// Any other provider failure. Not retried.
    #[error("storage provider error ({tag}): {message}")]
    Backend {
        status: Option<u16>,
        tag: String,
        message: String,
    },

    /// Stored document could not be decoded or encoded.
    #[error("invalid document at {path}: {message}")]
    InvalidDocument { path: String, message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl StorageError {
    #[must_use]
    pub fn path_rejected(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathRejected {
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The caller has to reconnect the provider account; retrying is pointless.
    #[must_use]
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Self::AuthTokenInvalid { .. } | Self::AuthUnavailable { .. }
        )
    }

    /// Original HTTP status where one is known.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthTokenInvalid { .. } => Some(401),
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            Self::RateLimited { .. } => Some(429),
            Self::Transient { status, .. } | Self::Backend { status, .. } => *status,
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
