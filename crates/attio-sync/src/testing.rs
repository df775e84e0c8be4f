//! # Test Support
//!
//! In-memory doubles for hosts that want to test their sync wiring without a
//! network: a scripted [`RemoteClient`], a queue that records submissions,
//! and a record store. Enabled for this crate's tests and, for downstream
//! crates, through the `testing` feature.
//!
//! ```rust,ignore
//! let stub = Arc::new(StubClient::new());
//! stub.stub_create_error(RemoteError::rate_limited(30));
//! let registry = ConfigurationRegistry::new(config, stub.factory());
//! // ... exercise the host ...
//! assert_sync_called(&stub, "people");
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use attio_core::{Entity, Payload, Record, RemoteResult};

use crate::client::{BulkRecord, BulkResponse, ClientFactory, RemoteClient};
use crate::config::ApiSettings;
use crate::error::SyncResult;
use crate::jobs::{DeferredTask, TaskQueue};
use crate::models::EntityStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Stub Client
// =============================================================================

/// One call received by a [`StubClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct StubCall {
    pub operation: String,
    pub object_type: String,
    pub record_id: Option<String>,
    /// Single-record payload or list filter; `Null` for bulk calls.
    pub payload: Value,
    /// Records of a bulk call.
    pub records: Vec<BulkRecord>,
    /// Ids of a bulk delete.
    pub record_ids: Vec<String>,
    pub match_attribute: Option<String>,
}

impl StubCall {
    fn new(operation: &str, object_type: &str) -> Self {
        StubCall {
            operation: operation.to_string(),
            object_type: object_type.to_string(),
            record_id: None,
            payload: Value::Null,
            records: Vec::new(),
            record_ids: Vec::new(),
            match_attribute: None,
        }
    }
}

/// Scripted remote client.
///
/// Queued responses are consumed per operation in FIFO order; once a queue
/// is empty the operation answers with a default success. Creates return
/// `rec_1`, `rec_2`, ... and bulk calls report every record successful.
#[derive(Default)]
pub struct StubClient {
    bulk: bool,
    calls: Mutex<Vec<StubCall>>,
    responses: Mutex<HashMap<String, VecDeque<RemoteResult<Value>>>>,
    bulk_responses: Mutex<HashMap<String, VecDeque<RemoteResult<BulkResponse>>>>,
    created: AtomicUsize,
}

impl StubClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise bulk support.
    pub fn with_bulk(mut self, bulk: bool) -> Self {
        self.bulk = bulk;
        self
    }

    /// A factory that always hands out this stub.
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ClientFactory> {
        let stub = Arc::clone(self);
        Arc::new(move |_: &ApiSettings| -> SyncResult<Arc<dyn RemoteClient>> {
            let client: Arc<dyn RemoteClient> = stub.clone();
            Ok(client)
        })
    }

    pub fn calls(&self) -> Vec<StubCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<StubCall> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.operation == operation)
            .cloned()
            .collect()
    }

    pub fn stub_create(&self, body: Value) {
        self.push("create", Ok(body));
    }

    pub fn stub_create_error(&self, error: attio_core::RemoteError) {
        self.push("create", Err(error));
    }

    pub fn stub_update(&self, body: Value) {
        self.push("update", Ok(body));
    }

    pub fn stub_update_error(&self, error: attio_core::RemoteError) {
        self.push("update", Err(error));
    }

    pub fn stub_delete_error(&self, error: attio_core::RemoteError) {
        self.push("delete", Err(error));
    }

    /// Queues one page of records for `list`.
    pub fn stub_list(&self, records: Vec<Value>) {
        self.push("list", Ok(Value::Array(records)));
    }

    pub fn stub_list_error(&self, error: attio_core::RemoteError) {
        self.push("list", Err(error));
    }

    pub fn stub_objects(&self, objects: Vec<Value>) {
        self.push("list_objects", Ok(Value::Array(objects)));
    }

    pub fn stub_attributes(&self, attributes: Vec<Value>) {
        self.push("list_attributes", Ok(Value::Array(attributes)));
    }

    /// Queues a response for a bulk operation (`create_records`, ...).
    pub fn stub_bulk(&self, operation: &str, response: BulkResponse) {
        lock(&self.bulk_responses)
            .entry(operation.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    pub fn stub_bulk_error(&self, operation: &str, error: attio_core::RemoteError) {
        lock(&self.bulk_responses)
            .entry(operation.to_string())
            .or_default()
            .push_back(Err(error));
    }

    fn push(&self, operation: &str, response: RemoteResult<Value>) {
        lock(&self.responses)
            .entry(operation.to_string())
            .or_default()
            .push_back(response);
    }

    fn next(&self, operation: &str) -> Option<RemoteResult<Value>> {
        lock(&self.responses)
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
    }

    fn next_bulk(&self, operation: &str) -> Option<RemoteResult<BulkResponse>> {
        lock(&self.bulk_responses)
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
    }

    fn record(&self, call: StubCall) {
        lock(&self.calls).push(call);
    }

    fn list_response(&self, operation: &str) -> RemoteResult<Vec<Value>> {
        match self.next(operation) {
            Some(Ok(Value::Array(items))) => Ok(items),
            Some(Ok(other)) => Ok(vec![other]),
            Some(Err(e)) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    fn bulk_call(&self, operation: &str, object_type: &str, records: &[BulkRecord], match_attribute: Option<&str>) -> RemoteResult<BulkResponse> {
        let mut call = StubCall::new(operation, object_type);
        call.records = records.to_vec();
        call.match_attribute = match_attribute.map(str::to_string);
        self.record(call);

        self.next_bulk(operation)
            .unwrap_or_else(|| Ok(BulkResponse::ok(records.iter().map(|r| r.reference.clone()).collect())))
    }
}

#[async_trait]
impl RemoteClient for StubClient {
    async fn create(&self, object_type: &str, payload: &Payload) -> RemoteResult<Value> {
        let mut call = StubCall::new("create", object_type);
        call.payload = Value::Object(payload.clone());
        self.record(call);

        self.next("create").unwrap_or_else(|| {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({"data": {"id": {"record_id": format!("rec_{}", n)}}}))
        })
    }

    async fn update(&self, object_type: &str, record_id: &str, payload: &Payload) -> RemoteResult<Value> {
        let mut call = StubCall::new("update", object_type);
        call.record_id = Some(record_id.to_string());
        call.payload = Value::Object(payload.clone());
        self.record(call);

        self.next("update")
            .unwrap_or_else(|| Ok(json!({"data": {"id": {"record_id": record_id}}})))
    }

    async fn delete(&self, object_type: &str, record_id: &str) -> RemoteResult<()> {
        let mut call = StubCall::new("delete", object_type);
        call.record_id = Some(record_id.to_string());
        self.record(call);

        match self.next("delete") {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    async fn list(&self, object_type: &str, filter: &Payload) -> RemoteResult<Vec<Value>> {
        let mut call = StubCall::new("list", object_type);
        call.payload = Value::Object(filter.clone());
        self.record(call);

        self.list_response("list")
    }

    async fn list_objects(&self) -> RemoteResult<Vec<Value>> {
        self.record(StubCall::new("list_objects", ""));
        self.list_response("list_objects")
    }

    async fn list_attributes(&self, object_type: &str) -> RemoteResult<Vec<Value>> {
        self.record(StubCall::new("list_attributes", object_type));
        self.list_response("list_attributes")
    }

    fn supports_bulk(&self) -> bool {
        self.bulk
    }

    async fn create_records(&self, object_type: &str, records: &[BulkRecord]) -> RemoteResult<BulkResponse> {
        self.bulk_call("create_records", object_type, records, None)
    }

    async fn update_records(&self, object_type: &str, records: &[BulkRecord]) -> RemoteResult<BulkResponse> {
        self.bulk_call("update_records", object_type, records, None)
    }

    async fn upsert_records(
        &self,
        object_type: &str,
        records: &[BulkRecord],
        match_attribute: &str,
    ) -> RemoteResult<BulkResponse> {
        self.bulk_call("upsert_records", object_type, records, Some(match_attribute))
    }

    async fn delete_records(&self, object_type: &str, record_ids: &[String]) -> RemoteResult<BulkResponse> {
        let mut call = StubCall::new("delete_records", object_type);
        call.record_ids = record_ids.to_vec();
        self.record(call);

        self.next_bulk("delete_records")
            .unwrap_or_else(|| Ok(BulkResponse::ok(record_ids.to_vec())))
    }
}

// =============================================================================
// Recording Queue
// =============================================================================

/// Task queue that only remembers what was submitted.
#[derive(Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<DeferredTask>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<DeferredTask> {
        lock(&self.tasks).clone()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn submit(&self, task: DeferredTask) -> SyncResult<()> {
        lock(&self.tasks).push(task);
        Ok(())
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Entity store over a list of [`Record`]s.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: Record) {
        lock(&self.records).push(record);
    }

    pub fn remove(&self, entity_type: &str, id: &str) {
        lock(&self.records).retain(|r| !(r.entity_type() == entity_type && r.id() == id));
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn find_by(&self, entity_type: &str, field: &str, value: &Value) -> SyncResult<Option<Box<dyn Entity>>> {
        let found = lock(&self.records)
            .iter()
            .find(|r| r.entity_type() == entity_type && r.field(field).as_ref() == Some(value))
            .cloned();
        Ok(found.map(|r| Box::new(r) as Box<dyn Entity>))
    }
}

// =============================================================================
// Assertions
// =============================================================================

const WRITE_OPERATIONS: [&str; 5] = ["create", "update", "create_records", "update_records", "upsert_records"];

/// Panics unless a create or update reached `object_type`.
pub fn assert_sync_called(stub: &StubClient, object_type: &str) {
    let calls = stub.calls();
    assert!(
        calls
            .iter()
            .any(|c| c.object_type == object_type && WRITE_OPERATIONS.contains(&c.operation.as_str())),
        "expected a sync to {}, got {:?}",
        object_type,
        calls
    );
}

/// Panics if any create or update was issued.
pub fn assert_no_sync(stub: &StubClient) {
    let calls = stub.calls();
    assert!(
        !calls.iter().any(|c| WRITE_OPERATIONS.contains(&c.operation.as_str())),
        "expected no sync, got {:?}",
        calls
    );
}

/// Panics unless `remote_id` was deleted from `object_type`.
pub fn assert_remove_called(stub: &StubClient, object_type: &str, remote_id: &str) {
    let calls = stub.calls();
    let removed = calls.iter().any(|c| {
        c.object_type == object_type
            && ((c.operation == "delete" && c.record_id.as_deref() == Some(remote_id))
                || (c.operation == "delete_records" && c.record_ids.iter().any(|id| id == remote_id)))
    });
    assert!(removed, "expected {} to be removed from {}, got {:?}", remote_id, object_type, calls);
}
