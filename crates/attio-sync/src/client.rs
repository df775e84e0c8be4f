//! # Remote Client Contract
//!
//! The operations the orchestration layer needs from a CRM client. The wire
//! protocol lives in the host-supplied implementation; this crate only ever
//! talks to `dyn RemoteClient`.
//!
//! ## Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      RemoteClient Surface                               │
//! │                                                                         │
//! │  SINGLE RECORD                      BULK (optional, supports_bulk())    │
//! │  ─────────────                      ────────────────────────────────    │
//! │  create(object, payload)            create_records(object, records)    │
//! │  update(object, id, payload)        update_records(object, records)    │
//! │  delete(object, id)                 upsert_records(object, records, m) │
//! │  list(object, filter)               delete_records(object, ids)        │
//! │                                                                         │
//! │  METADATA                                                              │
//! │  ────────                                                              │
//! │  list_objects()   list_attributes(object)                              │
//! │                                                                         │
//! │  Every operation may fail with RemoteError::{RateLimited, Validation,  │
//! │  Authentication, NotFound, Server, Unsupported, Other}                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use attio_core::{Payload, RemoteError, RemoteResult};

use crate::config::ApiSettings;
use crate::error::SyncResult;

// =============================================================================
// Bulk Types
// =============================================================================

/// One record inside a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRecord {
    /// Local entity id, echoed back in `BulkResponse` id lists.
    pub reference: String,

    /// Remote record id, when the entity already exists remotely.
    pub record_id: Option<String>,

    pub values: Payload,
}

/// Response of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub success: bool,
    pub partial_success: bool,
    #[serde(default)]
    pub successful_ids: Vec<String>,
    #[serde(default)]
    pub failed_ids: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl BulkResponse {
    /// Every record succeeded.
    pub fn ok(successful_ids: Vec<String>) -> Self {
        BulkResponse {
            success: true,
            successful_ids,
            ..Default::default()
        }
    }

    /// Some records succeeded.
    pub fn partial(successful_ids: Vec<String>, failed_ids: Vec<String>, errors: Vec<String>) -> Self {
        BulkResponse {
            success: false,
            partial_success: true,
            successful_ids,
            failed_ids,
            errors,
        }
    }

    /// Nothing succeeded.
    pub fn failure(errors: Vec<String>) -> Self {
        BulkResponse {
            errors,
            ..Default::default()
        }
    }

    /// Joined error text for failure accounting.
    pub fn error_message(&self) -> String {
        if self.errors.is_empty() {
            "Bulk operation failed".to_string()
        } else {
            self.errors.join("; ")
        }
    }
}

// =============================================================================
// Remote Client Trait
// =============================================================================

/// A CRM client scoped to record resources.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Creates a record and returns the response body.
    async fn create(&self, object_type: &str, payload: &Payload) -> RemoteResult<Value>;

    /// Updates a record and returns the response body.
    async fn update(&self, object_type: &str, record_id: &str, payload: &Payload) -> RemoteResult<Value>;

    /// Deletes a record.
    async fn delete(&self, object_type: &str, record_id: &str) -> RemoteResult<()>;

    /// Lists records matching a filter.
    async fn list(&self, object_type: &str, filter: &Payload) -> RemoteResult<Vec<Value>>;

    /// Lists the object types of the workspace.
    async fn list_objects(&self) -> RemoteResult<Vec<Value>> {
        Err(RemoteError::Unsupported("list_objects".into()))
    }

    /// Lists the attributes of an object type.
    async fn list_attributes(&self, _object_type: &str) -> RemoteResult<Vec<Value>> {
        Err(RemoteError::Unsupported("list_attributes".into()))
    }

    /// Whether the bulk operations below are implemented.
    fn supports_bulk(&self) -> bool {
        false
    }

    async fn create_records(&self, _object_type: &str, _records: &[BulkRecord]) -> RemoteResult<BulkResponse> {
        Err(RemoteError::Unsupported("create_records".into()))
    }

    async fn update_records(&self, _object_type: &str, _records: &[BulkRecord]) -> RemoteResult<BulkResponse> {
        Err(RemoteError::Unsupported("update_records".into()))
    }

    async fn upsert_records(
        &self,
        _object_type: &str,
        _records: &[BulkRecord],
        _match_attribute: &str,
    ) -> RemoteResult<BulkResponse> {
        Err(RemoteError::Unsupported("upsert_records".into()))
    }

    async fn delete_records(&self, _object_type: &str, _record_ids: &[String]) -> RemoteResult<BulkResponse> {
        Err(RemoteError::Unsupported("delete_records".into()))
    }
}

// =============================================================================
// Client Factory
// =============================================================================

/// Builds the plain remote client from credentials. The registry wraps the
/// result in a `RateLimitedClient` when configured to.
pub trait ClientFactory: Send + Sync {
    fn build(&self, api: &ApiSettings) -> SyncResult<Arc<dyn RemoteClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&ApiSettings) -> SyncResult<Arc<dyn RemoteClient>> + Send + Sync,
{
    fn build(&self, api: &ApiSettings) -> SyncResult<Arc<dyn RemoteClient>> {
        self(api)
    }
}

// =============================================================================
// Response Helpers
// =============================================================================

/// Extracts the record id from a create/update response body.
///
/// Looks at `data.id.record_id`, `id.record_id`, `data.id`, then `id`; the
/// first string found wins.
pub fn record_id_from_response(body: &Value) -> Option<String> {
    const PATHS: [&[&str]; 4] = [
        &["data", "id", "record_id"],
        &["id", "record_id"],
        &["data", "id"],
        &["id"],
    ];

    PATHS.iter().find_map(|path| {
        let mut current = body;
        for segment in path.iter() {
            current = current.get(segment)?;
        }
        match current {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    })
}
