//! # Sync Error Types
//!
//! Error types for sync orchestration.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Remote      │  │       Entity            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  RateLimited    │  │  Core (hooks, methods)  │ │
//! │  │  MissingApiKey  │  │  Validation     │  │  MissingRemoteId        │ │
//! │  │  InvalidUrl     │  │  Authentication │  │  EntityNotFound         │ │
//! │  │  ConfigLoad/Save│  │  NotFound/Server│  │  UnknownEntityType      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │     Batch       │  │      Queue / Internal                       │  │
//! │  │                 │  │                                             │  │
//! │  │  BatchSync      │  │  ChannelError  Internal                     │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use attio_core::{CoreError, ErrorInfo, ErrorKind, RemoteError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all orchestration failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// No API key configured; the client cannot be built.
    #[error("API key not configured. Set ATTIO_API_KEY or configure api.api_key.")]
    MissingApiKey,

    /// Invalid API base URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The remote client failed.
    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// A create response carried no record id.
    #[error("Create response for '{object_type}' did not contain a record id")]
    MissingRemoteId { object_type: String },

    // =========================================================================
    // Entity Errors
    // =========================================================================
    /// Entity access, hook or transform failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A deferred task referenced an entity type nobody registered.
    #[error("No sync registration for entity type '{0}'")]
    UnknownEntityType(String),

    /// A deferred task's entity no longer exists.
    #[error("{entity_type} {id} not found")]
    EntityNotFound { entity_type: String, id: String },

    // =========================================================================
    // Batch Errors
    // =========================================================================
    /// Every entity in a batch run failed and `raise_on_failure` was set.
    #[error("Batch sync failed for {failed} record(s): {message}")]
    BatchSync { failed: usize, message: String },

    // =========================================================================
    // Queue / Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Failed to serialize a payload or task.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Internal error (e.g. a poisoned lock).
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<&SyncError> for ErrorInfo {
    fn from(err: &SyncError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Flat classification used by job retry policies.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Remote(remote) => remote.kind(),
            SyncError::MissingApiKey => ErrorKind::Authentication,
            _ => ErrorKind::Generic,
        }
    }

    /// Returns the remote error, if this wraps one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    /// Returns true if the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Returns true for rate-limit failures.
    pub fn is_rate_limited(&self) -> bool {
        self.as_remote().map_or(false, RemoteError::is_rate_limited)
    }

    /// Returns true for authentication failures, which always surface.
    pub fn is_authentication(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }

    /// Returns true if a deferred task hitting this error should be dropped
    /// without retry.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            SyncError::EntityNotFound { .. } | SyncError::UnknownEntityType(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingApiKey
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::from(RemoteError::rate_limited(5)).is_retryable());
        assert!(SyncError::from(RemoteError::Server {
            status: 502,
            message: "bad gateway".into()
        })
        .is_retryable());

        assert!(!SyncError::from(RemoteError::Validation("email".into())).is_retryable());
        assert!(!SyncError::MissingApiKey.is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(SyncError::MissingApiKey.is_config_error());
        assert!(SyncError::MissingApiKey.is_authentication());
        assert!(SyncError::from(RemoteError::Authentication("revoked".into())).is_authentication());
        assert!(SyncError::EntityNotFound {
            entity_type: "User".into(),
            id: "1".into()
        }
        .is_discardable());
        assert!(SyncError::from(RemoteError::rate_limited(1)).is_rate_limited());
    }

    #[test]
    fn test_error_info_conversion() {
        let err = SyncError::from(RemoteError::Validation("email is invalid".into()));
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, ErrorKind::Validation);
        assert!(info.message.contains("email is invalid"));
    }
}
