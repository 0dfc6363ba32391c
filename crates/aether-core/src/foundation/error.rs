//! Unified error types for the Aether core.
//!
//! Provider failures are normalized into [`ChatError`] so callers only ever
//! branch on [`ErrorKind`], never on vendor-specific codes. Platform failures
//! use [`PlatformError`]. Plugin errors live in `aether-framework`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type-erased error returned by plugin hooks and event handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Chat / Provider Errors
// =============================================================================

/// Field-less discriminant of [`ChatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ProviderNotFound,
    RateLimited,
    AuthFailure,
    InvalidRequest,
    Timeout,
    Unavailable,
    Cancelled,
}

impl ErrorKind {
    /// Returns the canonical name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderNotFound => "ProviderNotFound",
            Self::RateLimited => "RateLimited",
            Self::AuthFailure => "AuthFailure",
            Self::InvalidRequest => "InvalidRequest",
            Self::Timeout => "Timeout",
            Self::Unavailable => "Unavailable",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while resolving or executing a chat request.
///
/// The `Display` text always starts with the kind name, and is what the
/// event-stream `[ERROR]` line carries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChatError {
    /// No provider matched the requested name, and no default applied.
    #[error("ProviderNotFound: {0}")]
    ProviderNotFound(String),

    /// The vendor rejected the call for exceeding its rate limit.
    #[error("RateLimited")]
    RateLimited {
        /// Wait hint reported by the vendor, if any.
        retry_after: Option<Duration>,
    },

    /// Credentials were missing or rejected.
    #[error("AuthFailure: {0}")]
    AuthFailure(String),

    /// The request was malformed or referenced an unknown model.
    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    /// The call did not finish within its deadline.
    #[error("Timeout")]
    Timeout,

    /// The vendor was unreachable, failed, or produced non-conforming output.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// The caller went away before the request finished.
    #[error("Cancelled")]
    Cancelled,
}

impl ChatError {
    /// Returns the normalized kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::AuthFailure(_) => ErrorKind::AuthFailure,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Timeout => ErrorKind::Timeout,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Creates an invalid request error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates an auth failure error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthFailure(msg.into())
    }

    /// Maps an HTTP status code returned by a vendor API.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let detail = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        match status {
            429 => Self::RateLimited { retry_after: None },
            401 | 403 => Self::AuthFailure(detail),
            400 | 404 | 413 | 422 => Self::InvalidRequest(detail),
            408 | 504 => Self::Timeout,
            _ => Self::Unavailable(detail),
        }
    }

    /// Returns true if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unavailable(_))
    }
}

// =============================================================================
// Platform Errors
// =============================================================================

/// Errors that can occur in platform operations.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// No platform is registered under this name.
    #[error("platform '{0}' not found")]
    NotFound(String),

    /// A platform with this name already exists.
    #[error("platform '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Connecting failed after all attempts.
    #[error("platform '{platform}' failed to connect: {reason}")]
    ConnectFailure {
        /// The platform name.
        platform: String,
        /// Reason for failure.
        reason: String,
    },

    /// The platform is not connected.
    #[error("platform '{0}' is not connected")]
    NotConnected(String),

    /// An outbound call was rejected.
    #[error("failed to send message: {0}")]
    Send(String),

    /// A single attempt exceeded its deadline.
    #[error("platform '{platform}' timed out after {elapsed:?}")]
    Timeout {
        /// The platform name.
        platform: String,
        /// Deadline that expired.
        elapsed: Duration,
    },
}

impl PlatformError {
    /// Creates a connect failure error.
    pub fn connect(platform: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ConnectFailure {
            platform: platform.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a send error.
    pub fn send(msg: impl std::fmt::Display) -> Self {
        Self::Send(msg.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Result type for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;
