//! # Batch Orchestrator
//!
//! Bulk create/update/upsert/delete over many entities with per-entity
//! accounting.
//!
//! ## Batch Processing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    BatchOrchestrator::perform                           │
//! │                                                                         │
//! │  entities ──► (Delete: drop entities without remote id)                │
//! │          ──► chunks of batch_size, strictly in input order             │
//! │                                                                         │
//! │  for each batch:                                                       │
//! │    1. Payloads: options.transform ─► options.spec ─► serialize_payload │
//! │                 ─► attributes  (a failing payload fails that entity)   │
//! │                                                                         │
//! │    2. Call: bulk op if client.supports_bulk(), else single calls       │
//! │             folded into one BulkResponse                               │
//! │                                                                         │
//! │    3. Classify:                                                        │
//! │       success          ──► all successful                              │
//! │       partial_success  ──► successful_ids / failed_ids / rest partial  │
//! │       failure          ──► all failed (shared message)                 │
//! │                                                                         │
//! │    RateLimited ─► book records settled before the limit, then for the  │
//! │                   rest:                                                │
//! │                 ┌─ run_async + queue ─► one DeferredTask per entity,   │
//! │                 │                       delayed by retry-after; partial│
//! │                 └─ otherwise ─► sleep retry-after, retry batch once    │
//! │    Other error ─► on_error(err, batch) ─► all failed                   │
//! │                                                                         │
//! │    4. progress(batch_no, total_batches, &results)                      │
//! │                                                                         │
//! │  raise_on_failure && nothing succeeded && something failed ─► Err      │
//! │  on_complete(&results)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use attio_core::{
    map_attributes, present_remote_id, BatchResult, Callback, CoreError, Entity, Operation, Payload,
    RemoteError, RemoteResult, SyncSpec,
};

use crate::client::{record_id_from_response, BulkRecord, BulkResponse, RemoteClient};
use crate::config::ConfigurationRegistry;
use crate::error::{SyncError, SyncResult};
use crate::jobs::{DeferredTask, TaskQueue};

// =============================================================================
// Options
// =============================================================================

/// Builds a batch payload directly from an entity.
pub type BatchTransformFn<E> = dyn Fn(&E) -> Payload + Send + Sync;

type ErrorCallback<E> = Box<dyn Fn(&SyncError, &[E]) + Send + Sync>;
type ProgressCallback<E> = Box<dyn Fn(usize, usize, &BatchResult<E>) + Send + Sync>;
type CompleteCallback<E> = Box<dyn Fn(&BatchResult<E>) + Send + Sync>;

/// Options for one batch run.
pub struct BatchOptions<E> {
    /// Entities per batch; defaults to the configured batch size.
    pub batch_size: Option<usize>,

    /// Re-queue rate-limited batches as deferred tasks instead of sleeping.
    pub run_async: bool,

    /// Payload override, closure or named entity method.
    pub transform: Option<Callback<BatchTransformFn<E>>>,

    /// Mapping used when no transform is given.
    pub spec: Option<Arc<SyncSpec>>,

    /// Upsert match attribute; defaults to the configured one.
    pub match_field: Option<String>,

    pub raise_on_failure: bool,

    on_error: Option<ErrorCallback<E>>,
    progress: Option<ProgressCallback<E>>,
    on_complete: Option<CompleteCallback<E>>,
}

impl<E> Default for BatchOptions<E> {
    fn default() -> Self {
        BatchOptions {
            batch_size: None,
            run_async: false,
            transform: None,
            spec: None,
            match_field: None,
            raise_on_failure: false,
            on_error: None,
            progress: None,
            on_complete: None,
        }
    }
}

impl<E> BatchOptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn run_async(mut self, run_async: bool) -> Self {
        self.run_async = run_async;
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> Payload + Send + Sync + 'static,
    {
        self.transform = Some(Callback::Closure(Arc::new(f)));
        self
    }

    pub fn transform_method(mut self, method: impl Into<String>) -> Self {
        self.transform = Some(Callback::Named(method.into()));
        self
    }

    pub fn spec(mut self, spec: Arc<SyncSpec>) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn match_field(mut self, field: impl Into<String>) -> Self {
        self.match_field = Some(field.into());
        self
    }

    pub fn raise_on_failure(mut self, raise: bool) -> Self {
        self.raise_on_failure = raise;
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncError, &[E]) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called after each batch with `(batch_no, total_batches, results)`,
    /// `batch_no` starting at 1.
    pub fn progress<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize, &BatchResult<E>) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&BatchResult<E>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs bulk operations in batches.
pub struct BatchOrchestrator {
    config: Arc<ConfigurationRegistry>,
    queue: Option<Arc<dyn TaskQueue>>,
}

/// Per-run values resolved once from options and configuration.
struct RunContext<'a> {
    client: Arc<dyn RemoteClient>,
    object_type: &'a str,
    operation: Operation,
    match_field: String,
    default_retry_after: Duration,
}

impl BatchOrchestrator {
    pub fn new(config: Arc<ConfigurationRegistry>) -> Self {
        BatchOrchestrator { config, queue: None }
    }

    pub fn with_queue(config: Arc<ConfigurationRegistry>, queue: Arc<dyn TaskQueue>) -> Self {
        BatchOrchestrator {
            config,
            queue: Some(queue),
        }
    }

    /// Applies `operation` to every entity, batch by batch.
    pub async fn perform<E: Entity>(
        &self,
        entities: Vec<E>,
        object_type: &str,
        operation: Operation,
        options: BatchOptions<E>,
    ) -> SyncResult<BatchResult<E>> {
        let mut results = BatchResult::new();
        if entities.is_empty() {
            return Ok(results);
        }

        let config = self.config.snapshot()?;
        let batch_size = options.batch_size.unwrap_or(config.sync.batch_size).max(1);

        let entities = if operation == Operation::Delete {
            let (linked, unlinked): (Vec<E>, Vec<E>) = entities
                .into_iter()
                .partition(|entity| present_remote_id(entity).is_some());
            if !unlinked.is_empty() {
                debug!(object_type, dropped = unlinked.len(), "Skipping entities without remote id");
            }
            linked
        } else {
            entities
        };

        let ctx = RunContext {
            client: self.config.client_unguarded()?,
            object_type,
            operation,
            match_field: options
                .match_field
                .clone()
                .unwrap_or_else(|| config.sync.upsert_match_field.clone()),
            default_retry_after: Duration::from_secs(config.api.default_retry_after_secs),
        };

        let mut batches: Vec<Vec<E>> = Vec::new();
        let mut remaining = entities.into_iter().peekable();
        while remaining.peek().is_some() {
            batches.push(remaining.by_ref().take(batch_size).collect());
        }
        let total_batches = batches.len();

        info!(
            object_type,
            operation = %operation,
            batches = total_batches,
            batch_size,
            "Starting batch sync"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            let batch_no = index + 1;
            debug!(object_type, batch = batch_no, size = batch.len(), "Processing batch");

            self.process_batch(&ctx, batch, &options, &mut results).await;

            if let Some(progress) = &options.progress {
                progress(batch_no, total_batches, &results);
            }
        }

        info!(
            object_type,
            operation = %operation,
            successful = results.successful.len(),
            failed = results.failed.len(),
            partial = results.partial.len(),
            "Batch sync finished"
        );

        if options.raise_on_failure && results.is_total_failure() {
            let message = results
                .failed
                .first()
                .map(|failure| failure.error.clone())
                .unwrap_or_default();
            return Err(SyncError::BatchSync {
                failed: results.failed.len(),
                message,
            });
        }

        if let Some(on_complete) = &options.on_complete {
            on_complete(&results);
        }

        Ok(results)
    }

    async fn process_batch<E: Entity>(
        &self,
        ctx: &RunContext<'_>,
        batch: Vec<E>,
        options: &BatchOptions<E>,
        results: &mut BatchResult<E>,
    ) {
        let mut ready = Vec::with_capacity(batch.len());
        let mut records = Vec::with_capacity(batch.len());

        for entity in batch {
            let values = if ctx.operation == Operation::Delete {
                Ok(Payload::new())
            } else {
                payload_for(&entity, options)
            };

            match values {
                Ok(values) => {
                    records.push(BulkRecord {
                        reference: entity.id(),
                        record_id: present_remote_id(&entity),
                        values,
                    });
                    ready.push(entity);
                }
                Err(e) => {
                    warn!(object_type = ctx.object_type, entity_id = %entity.id(), error = %e, "Could not build payload");
                    results.push_failed(entity, e.to_string());
                }
            }
        }

        if ready.is_empty() {
            return;
        }

        let dispatched = dispatch(ctx, &records, &mut ready).await;
        let (error, mut pending, pending_records) = match dispatched {
            Ok(response) => return classify(ready, &response, results),
            Err(interrupted) => settle(interrupted, ready, records, results),
        };

        let error = if error.is_rate_limited() && !pending.is_empty() {
            let delay = error
                .as_remote()
                .and_then(RemoteError::retry_after)
                .unwrap_or(ctx.default_retry_after);

            if options.run_async {
                if let Some(queue) = &self.queue {
                    return self.defer_batch(ctx, queue.as_ref(), pending, delay, results).await;
                }
            }

            warn!(
                object_type = ctx.object_type,
                pending = pending.len(),
                delay_secs = delay.as_secs(),
                "Batch rate limited, retrying once"
            );
            tokio::time::sleep(delay).await;

            let retried = dispatch(ctx, &pending_records, &mut pending).await;
            match retried {
                Ok(response) => return classify(pending, &response, results),
                Err(interrupted) => {
                    let (error, rest, _) = settle(interrupted, pending, pending_records, results);
                    pending = rest;
                    error
                }
            }
        } else {
            error
        };

        if pending.is_empty() {
            return;
        }

        error!(object_type = ctx.object_type, size = pending.len(), error = %error, "Batch failed");
        if let Some(on_error) = &options.on_error {
            on_error(&error, &pending);
        }

        let message = error.to_string();
        for entity in pending {
            results.push_failed(entity, message.clone());
        }
    }

    async fn defer_batch<E: Entity>(
        &self,
        ctx: &RunContext<'_>,
        queue: &dyn TaskQueue,
        batch: Vec<E>,
        delay: Duration,
        results: &mut BatchResult<E>,
    ) {
        info!(
            object_type = ctx.object_type,
            size = batch.len(),
            delay_secs = delay.as_secs(),
            "Batch rate limited, deferring entities"
        );

        for entity in batch {
            let task = match (ctx.operation, present_remote_id(&entity)) {
                (Operation::Delete, Some(remote_id)) => {
                    DeferredTask::remove(entity.entity_type(), entity.id(), ctx.object_type, remote_id)
                }
                _ => DeferredTask::sync(entity.entity_type(), entity.id()),
            };

            match queue.submit(task.with_delay(delay)).await {
                Ok(()) => results.partial.push(entity),
                Err(e) => {
                    warn!(object_type = ctx.object_type, entity_id = %entity.id(), error = %e, "Could not defer entity");
                    results.push_failed(entity, e.to_string());
                }
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn payload_for<E: Entity>(entity: &E, options: &BatchOptions<E>) -> SyncResult<Payload> {
    if let Some(transform) = &options.transform {
        return match transform {
            Callback::Closure(f) => Ok(f(entity)),
            Callback::Named(method) => match entity.invoke(method, None)? {
                Some(Value::Object(map)) => Ok(map),
                other => Err(CoreError::InvalidTransformResult {
                    name: method.clone(),
                    actual: other.map_or_else(|| "nil".to_string(), |v| v.to_string()),
                }
                .into()),
            },
        };
    }

    if let Some(spec) = &options.spec {
        return Ok(map_attributes(entity, spec)?);
    }

    Ok(entity.serialize_payload().unwrap_or_else(|| entity.attributes()))
}

/// A batch call that stopped early. Records already settled before the
/// failure are listed so only the rest get retried or deferred.
struct Interrupted {
    error: SyncError,
    succeeded: Vec<String>,
    failed: Vec<(String, String)>,
}

impl From<RemoteError> for Interrupted {
    fn from(error: RemoteError) -> Self {
        Interrupted {
            error: error.into(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

async fn dispatch<E: Entity>(
    ctx: &RunContext<'_>,
    records: &[BulkRecord],
    entities: &mut [E],
) -> Result<BulkResponse, Interrupted> {
    let client = ctx.client.as_ref();

    if !client.supports_bulk() {
        return dispatch_sequential(ctx, records, entities).await;
    }

    let response = match ctx.operation {
        Operation::Create => client.create_records(ctx.object_type, records).await?,
        Operation::Update => client.update_records(ctx.object_type, records).await?,
        Operation::Upsert => {
            client
                .upsert_records(ctx.object_type, records, &ctx.match_field)
                .await?
        }
        Operation::Delete => {
            let ids: Vec<String> = records.iter().filter_map(|r| r.record_id.clone()).collect();
            client.delete_records(ctx.object_type, &ids).await?
        }
    };
    Ok(response)
}

/// Issues one call per record and folds the outcomes into a `BulkResponse`.
/// A rate limit on any call stops the run; records handled before it are
/// reported with the error.
async fn dispatch_sequential<E: Entity>(
    ctx: &RunContext<'_>,
    records: &[BulkRecord],
    entities: &mut [E],
) -> Result<BulkResponse, Interrupted> {
    let client = ctx.client.as_ref();
    let mut succeeded = Vec::new();
    let mut failed: Vec<(String, String)> = Vec::new();

    for (record, entity) in records.iter().zip(entities.iter_mut()) {
        let outcome = match (ctx.operation, record.record_id.as_deref()) {
            (Operation::Create, _) | (Operation::Upsert, None) => {
                create_one(client, ctx.object_type, record, entity).await
            }
            (Operation::Update, Some(id)) | (Operation::Upsert, Some(id)) => client
                .update(ctx.object_type, id, &record.values)
                .await
                .map(|_| ()),
            (Operation::Update, None) => Err(RemoteError::Other(format!(
                "{} {} has no remote id to update",
                entity.entity_type(),
                record.reference
            ))),
            (Operation::Delete, Some(id)) => match client.delete(ctx.object_type, id).await {
                Err(e) if e.is_not_found() => {
                    debug!(object_type = ctx.object_type, remote_id = id, "Remote record already gone");
                    Ok(())
                }
                other => other,
            },
            (Operation::Delete, None) => Ok(()),
        };

        match outcome {
            Ok(()) => succeeded.push(record.reference.clone()),
            Err(e) if e.is_rate_limited() => {
                return Err(Interrupted {
                    error: e.into(),
                    succeeded,
                    failed,
                })
            }
            Err(e) => failed.push((record.reference.clone(), format!("{}: {}", record.reference, e))),
        }
    }

    Ok(if failed.is_empty() {
        BulkResponse::ok(succeeded)
    } else {
        let (failed_ids, errors): (Vec<String>, Vec<String>) = failed.into_iter().unzip();
        if succeeded.is_empty() {
            BulkResponse::failure(errors)
        } else {
            BulkResponse::partial(succeeded, failed_ids, errors)
        }
    })
}

/// Books the records an interrupted call already settled and returns the
/// error with the entities still outstanding. Outstanding records pick up
/// any remote id written during the call.
fn settle<E: Entity>(
    interrupted: Interrupted,
    batch: Vec<E>,
    records: Vec<BulkRecord>,
    results: &mut BatchResult<E>,
) -> (SyncError, Vec<E>, Vec<BulkRecord>) {
    let Interrupted { error, succeeded, failed } = interrupted;
    let mut pending = Vec::new();
    let mut pending_records = Vec::new();

    for (entity, mut record) in batch.into_iter().zip(records) {
        if succeeded.contains(&record.reference) {
            results.successful.push(entity);
        } else if let Some((_, message)) = failed.iter().find(|(reference, _)| *reference == record.reference) {
            results.push_failed(entity, message.clone());
        } else {
            record.record_id = present_remote_id(&entity);
            pending.push(entity);
            pending_records.push(record);
        }
    }

    (error, pending, pending_records)
}

async fn create_one<E: Entity>(
    client: &dyn RemoteClient,
    object_type: &str,
    record: &BulkRecord,
    entity: &mut E,
) -> RemoteResult<()> {
    let body = client.create(object_type, &record.values).await?;
    let remote_id = record_id_from_response(&body)
        .ok_or_else(|| RemoteError::Other("Create response did not contain a record id".into()))?;
    entity
        .write_remote_id(&remote_id)
        .map_err(|e| RemoteError::Other(e.to_string()))
}

fn classify<E: Entity>(batch: Vec<E>, response: &BulkResponse, results: &mut BatchResult<E>) {
    if response.success {
        results.successful.extend(batch);
        return;
    }

    let message = response.error_message();

    if !response.partial_success {
        for entity in batch {
            results.push_failed(entity, message.clone());
        }
        return;
    }

    for entity in batch {
        let id = entity.id();
        let remote_id = present_remote_id(&entity);

        if mentions(&response.successful_ids, &id, remote_id.as_deref()) {
            results.successful.push(entity);
        } else if mentions(&response.failed_ids, &id, remote_id.as_deref()) {
            results.push_failed(entity, message.clone());
        } else {
            results.partial.push(entity);
        }
    }
}

fn mentions(ids: &[String], id: &str, remote_id: Option<&str>) -> bool {
    ids.iter()
        .any(|candidate| candidate == id || Some(candidate.as_str()) == remote_id)
}
