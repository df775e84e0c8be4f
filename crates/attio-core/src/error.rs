//! # Error Types
//!
//! Domain-specific error types for attio-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  attio-core errors (this file)                                         │
//! │  ├── CoreError    - Entity access, hooks, transforms                   │
//! │  ├── RemoteError  - What a RemoteClient may fail with                  │
//! │  └── ErrorKind    - Flat classification used by retry policies         │
//! │                                                                         │
//! │  attio-sync errors (separate crate)                                    │
//! │  └── SyncError    - Orchestration failures (wraps both of the above)   │
//! │                                                                         │
//! │  Flow: RemoteError / CoreError → SyncError → error handler or log      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type alias for remote client operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while reading entities or evaluating spec callbacks.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A named method reference does not exist on the entity.
    #[error("{entity_type} does not respond to '{method}'")]
    UnknownMethod { entity_type: String, method: String },

    /// A named method exists but failed.
    #[error("Method '{method}' failed: {message}")]
    MethodFailed { method: String, message: String },

    /// A transform returned something other than an object.
    #[error("Transform '{name}' must return an object, got {actual}")]
    InvalidTransformResult { name: String, actual: String },

    /// A before/after sync hook failed.
    #[error("Hook failed: {0}")]
    Hook(String),

    /// A user supplied error handler raised its own error.
    #[error("Error handler raised: {0}")]
    Handler(String),

    /// The remote identifier could not be written onto the entity.
    #[error("Could not write remote id onto {entity_type} {entity_id}: {message}")]
    RemoteIdWrite {
        entity_type: String,
        entity_id: String,
        message: String,
    },
}

// =============================================================================
// Remote Error
// =============================================================================

/// Errors a remote CRM client can raise.
///
/// ## Handling Matrix
/// ```text
/// ┌──────────────────┬───────────┬──────────────────────────────────────┐
/// │ Variant          │ Retried?  │ Default handling                     │
/// ├──────────────────┼───────────┼──────────────────────────────────────┤
/// │ RateLimited      │ yes       │ sleep retry_after (default 60s)      │
/// │ Validation       │ never     │ logged and suppressed                │
/// │ Authentication   │ never     │ always re-raised                     │
/// │ NotFound         │ no        │ success on delete paths              │
/// │ Server           │ yes       │ job backoff                          │
/// │ Unsupported/Other│ no        │ depends on execution mode            │
/// └──────────────────┴───────────┴──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The CRM throttled the request.
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// The payload was rejected.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Credentials are missing, expired or revoked.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The referenced record does not exist remotely.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The CRM answered with a 5xx.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The client does not implement the requested operation.
    #[error("Operation not supported by client: {0}")]
    Unsupported(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Shorthand for a rate limit error with a retry-after hint in seconds.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(retry_after_secs)),
            message: format!("retry after {}s", retry_after_secs),
        }
    }

    /// Returns the flat classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::RateLimited { .. } => ErrorKind::RateLimit,
            RemoteError::Validation(_) => ErrorKind::Validation,
            RemoteError::Authentication(_) => ErrorKind::Authentication,
            RemoteError::NotFound(_) => ErrorKind::NotFound,
            RemoteError::Server { .. } => ErrorKind::Server,
            RemoteError::Unsupported(_) | RemoteError::Other(_) => ErrorKind::Generic,
        }
    }

    /// Returns the server supplied backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns true for rate limit errors.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }

    /// Returns true for not-found errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

// =============================================================================
// Error Kind
// =============================================================================

/// Flat error classification shared by outcomes and retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Validation,
    Authentication,
    NotFound,
    Server,
    Generic,
}

impl ErrorKind {
    /// Returns true if an operation failing with this kind may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::Server)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::RateLimit => write!(f, "rate_limit"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Authentication => write!(f, "authentication"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Server => write!(f, "server"),
            ErrorKind::Generic => write!(f, "generic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_kinds() {
        assert_eq!(RemoteError::rate_limited(30).kind(), ErrorKind::RateLimit);
        assert_eq!(
            RemoteError::Server {
                status: 503,
                message: "unavailable".into()
            }
            .kind(),
            ErrorKind::Server
        );
        assert_eq!(RemoteError::Other("boom".into()).kind(), ErrorKind::Generic);
        assert_eq!(
            RemoteError::Unsupported("upsert_records".into()).kind(),
            ErrorKind::Generic
        );
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        assert_eq!(
            RemoteError::rate_limited(12).retry_after(),
            Some(Duration::from_secs(12))
        );
        assert_eq!(RemoteError::NotFound("rec".into()).retry_after(), None);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::Server.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::UnknownMethod {
            entity_type: "User".into(),
            method: "crm_payload".into(),
        };
        assert!(err.to_string().contains("User"));
        assert!(err.to_string().contains("crm_payload"));
    }
}
