//! # Outcome Types
//!
//! What a sync attempt or a batch run reports back.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Outcome Types                                   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  SyncOutcome    │   │  BatchResult<E> │   │   Operation     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  status         │   │  successful     │   │  Create         │       │
//! │  │  remote_id      │   │  failed         │   │  Update         │       │
//! │  │  error          │   │  partial        │   │  Upsert         │       │
//! │  └─────────────────┘   └─────────────────┘   │  Delete         │       │
//! │                                              └─────────────────┘       │
//! │  Every entity submitted to a batch ends up in exactly one of the       │
//! │  three BatchResult lists (pre-filtered deletes excepted).              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RemoteError};

// =============================================================================
// Sync Outcome
// =============================================================================

/// Status of a single sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Created,
    Updated,
    Skipped,
    Failed,
    Removed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Created => write!(f, "created"),
            SyncStatus::Updated => write!(f, "updated"),
            SyncStatus::Skipped => write!(f, "skipped"),
            SyncStatus::Failed => write!(f, "failed"),
            SyncStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Serializable description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ErrorInfo {
            kind,
            message: message.into(),
        }
    }
}

impl From<&RemoteError> for ErrorInfo {
    fn from(err: &RemoteError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

/// Outcome of one sync or removal attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub remote_id: Option<String>,
    pub error: Option<ErrorInfo>,
}

impl SyncOutcome {
    pub fn created(remote_id: impl Into<String>) -> Self {
        SyncOutcome {
            status: SyncStatus::Created,
            remote_id: Some(remote_id.into()),
            error: None,
        }
    }

    pub fn updated(remote_id: impl Into<String>) -> Self {
        SyncOutcome {
            status: SyncStatus::Updated,
            remote_id: Some(remote_id.into()),
            error: None,
        }
    }

    pub fn removed(remote_id: Option<String>) -> Self {
        SyncOutcome {
            status: SyncStatus::Removed,
            remote_id,
            error: None,
        }
    }

    pub fn skipped() -> Self {
        SyncOutcome {
            status: SyncStatus::Skipped,
            remote_id: None,
            error: None,
        }
    }

    pub fn failed(remote_id: Option<String>, error: ErrorInfo) -> Self {
        SyncOutcome {
            status: SyncStatus::Failed,
            remote_id,
            error: Some(error),
        }
    }

    /// Returns true unless the attempt failed.
    pub fn is_success(&self) -> bool {
        self.status != SyncStatus::Failed
    }
}

// =============================================================================
// Lifecycle Events
// =============================================================================

/// Host record lifecycle hook that triggered a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created,
    Updated,
    Destroyed,
}

// =============================================================================
// Batch Types
// =============================================================================

/// Bulk operation applied by a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Upsert,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Upsert => write!(f, "upsert"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "upsert" => Ok(Operation::Upsert),
            "delete" | "destroy" => Ok(Operation::Delete),
            other => Err(format!(
                "Unknown batch operation: '{}'. Valid options: create, update, upsert, delete",
                other
            )),
        }
    }
}

/// An entity that failed inside a batch, with the error message captured
/// as a string so the failure list stays serializable.
#[derive(Debug, Clone)]
pub struct BatchFailure<E> {
    pub entity: E,
    pub error: String,
}

/// Aggregated outcome of a batch run.
#[derive(Debug, Clone)]
pub struct BatchResult<E> {
    pub successful: Vec<E>,
    pub failed: Vec<BatchFailure<E>>,
    /// Entities whose outcome is not final, e.g. re-queued after a rate limit.
    pub partial: Vec<E>,
}

impl<E> Default for BatchResult<E> {
    fn default() -> Self {
        BatchResult {
            successful: Vec::new(),
            failed: Vec::new(),
            partial: Vec::new(),
        }
    }
}

impl<E> BatchResult<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities accounted for across all three lists.
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len() + self.partial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// True when nothing succeeded and at least one entity failed.
    pub fn is_total_failure(&self) -> bool {
        self.successful.is_empty() && !self.failed.is_empty()
    }

    pub fn push_failed(&mut self, entity: E, error: impl Into<String>) {
        self.failed.push(BatchFailure {
            entity,
            error: error.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_parsing() {
        assert_eq!("create".parse::<Operation>().unwrap(), Operation::Create);
        assert_eq!("UPSERT".parse::<Operation>().unwrap(), Operation::Upsert);
        assert_eq!("destroy".parse::<Operation>().unwrap(), Operation::Delete);
        assert!("merge".parse::<Operation>().is_err());
    }

    #[test]
    fn test_batch_result_accounting() {
        let mut result: BatchResult<u32> = BatchResult::new();
        assert!(result.is_empty());
        assert!(!result.is_total_failure());

        result.push_failed(1, "boom");
        assert!(result.is_total_failure());

        result.successful.push(2);
        result.partial.push(3);
        assert_eq!(result.total(), 3);
        assert!(!result.is_total_failure());
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let outcome = SyncOutcome::created("rec_1");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "created");
        assert_eq!(json["remote_id"], "rec_1");
        assert!(outcome.is_success());
    }
}
