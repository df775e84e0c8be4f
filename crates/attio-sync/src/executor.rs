//! # Sync Executor
//!
//! Performs single-entity create/update/delete calls and decides between
//! inline and deferred execution.
//!
//! ## Sync Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        execute_sync(entity, spec)                       │
//! │                                                                         │
//! │  1. before_sync hook ──── Err ──────────────────────────┐               │
//! │  2. map_attributes                                      │               │
//! │  3. remote id set?                                      │               │
//! │       yes ─► update(object, remote_id, payload)         │               │
//! │              └─► transition rules (extra partial updates)               │
//! │       no  ─► create(object, payload)                    │               │
//! │              └─► write_remote_id(id from response)      │               │
//! │  4. after_sync hook                                     │               │
//! │  5. SyncOutcome { Created | Updated, remote_id }        ▼               │
//! │                                                                         │
//! │  sync_now wraps the above with the failure policy:                     │
//! │                                                                         │
//! │    error_handler set? ── yes ─► handler owns it (its Err propagates)   │
//! │         │                                                               │
//! │         no ─► log ─► Authentication, Strict mode or deferred task?     │
//! │                          yes ─► Err(error)                              │
//! │                          no  ─► Ok(Failed outcome)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dispatch
//! `sync` and `remove` enqueue a [`DeferredTask`] when `background_mode` is
//! on and a queue is attached; otherwise they run inline.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use attio_core::{
    map_attributes, present_remote_id, should_remove, should_sync, Entity, ErrorInfo, LifecycleEvent,
    SyncOutcome, SyncSettings, SyncSpec,
};

use crate::client::{record_id_from_response, RemoteClient};
use crate::config::ConfigurationRegistry;
use crate::error::{SyncError, SyncResult};
use crate::jobs::{in_deferred_task, DeferredTask, TaskQueue};

/// How a `sync`/`remove` request was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Submitted as a deferred task.
    Enqueued(Uuid),
    /// Ran inline.
    Completed(SyncOutcome),
    /// Policy declined.
    Skipped,
}

impl Dispatch {
    pub fn outcome(&self) -> Option<&SyncOutcome> {
        match self {
            Dispatch::Completed(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Single-entity sync orchestration.
pub struct SyncExecutor {
    config: Arc<ConfigurationRegistry>,
    queue: Option<Arc<dyn TaskQueue>>,
}

impl SyncExecutor {
    pub fn new(config: Arc<ConfigurationRegistry>) -> Self {
        SyncExecutor { config, queue: None }
    }

    pub fn with_queue(config: Arc<ConfigurationRegistry>, queue: Arc<dyn TaskQueue>) -> Self {
        SyncExecutor {
            config,
            queue: Some(queue),
        }
    }

    pub fn config(&self) -> &Arc<ConfigurationRegistry> {
        &self.config
    }

    pub fn queue(&self) -> Option<&Arc<dyn TaskQueue>> {
        self.queue.as_ref()
    }

    pub fn settings(&self) -> SyncResult<SyncSettings> {
        self.config.settings()
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Runs the sync steps without any failure policy.
    pub async fn execute_sync(&self, entity: &mut dyn Entity, spec: &SyncSpec) -> SyncResult<SyncOutcome> {
        spec.run_before_sync(&*entity)?;

        let payload = map_attributes(&*entity, spec)?;
        let client = self.config.client()?;

        let outcome = match present_remote_id(&*entity) {
            Some(remote_id) => {
                client.update(&spec.object_type, &remote_id, &payload).await?;
                self.apply_transitions(client.as_ref(), &*entity, spec, &remote_id)
                    .await?;
                SyncOutcome::updated(remote_id)
            }
            None => {
                let body = client.create(&spec.object_type, &payload).await?;
                let remote_id = record_id_from_response(&body).ok_or_else(|| SyncError::MissingRemoteId {
                    object_type: spec.object_type.clone(),
                })?;
                entity.write_remote_id(&remote_id)?;
                SyncOutcome::created(remote_id)
            }
        };

        spec.run_after_sync(&*entity, &outcome)?;
        Ok(outcome)
    }

    /// Syncs inline, applying the failure policy.
    pub async fn sync_now(&self, entity: &mut dyn Entity, spec: &SyncSpec) -> SyncResult<SyncOutcome> {
        match self.execute_sync(entity, spec).await {
            Ok(outcome) => {
                info!(
                    object_type = %spec.object_type,
                    entity_id = %spec.identifier_for(&*entity),
                    remote_id = outcome.remote_id.as_deref().unwrap_or_default(),
                    status = %outcome.status,
                    "Entity synced"
                );
                Ok(outcome)
            }
            Err(error) => {
                let remote_id = present_remote_id(&*entity);
                self.handle_failure(error, &*entity, spec, remote_id)
            }
        }
    }

    /// Syncs inline or enqueues a deferred sync, depending on
    /// `background_mode`.
    pub async fn sync(&self, entity: &mut dyn Entity, spec: &SyncSpec) -> SyncResult<Dispatch> {
        let settings = self.settings()?;

        if settings.background_mode {
            match &self.queue {
                Some(queue) => {
                    let task = DeferredTask::sync(entity.entity_type(), entity.id());
                    let task_id = task.id;
                    queue.submit(task).await?;
                    debug!(object_type = %spec.object_type, entity_id = %entity.id(), %task_id, "Sync enqueued");
                    return Ok(Dispatch::Enqueued(task_id));
                }
                None => {
                    warn!(
                        object_type = %spec.object_type,
                        "Background mode enabled but no task queue attached, syncing inline"
                    );
                }
            }
        }

        self.sync_now(entity, spec).await.map(Dispatch::Completed)
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Deletes the remote record of `entity` inline.
    pub async fn remove_now(&self, entity: &dyn Entity, spec: &SyncSpec) -> SyncResult<SyncOutcome> {
        let Some(remote_id) = present_remote_id(entity) else {
            debug!(object_type = %spec.object_type, entity_id = %entity.id(), "Nothing to remove");
            return Ok(SyncOutcome::skipped());
        };

        match self.remove_remote(&spec.object_type, &remote_id).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => self.handle_failure(error, entity, spec, Some(remote_id)),
        }
    }

    /// Removes inline or enqueues a deferred removal.
    pub async fn remove(&self, entity: &dyn Entity, spec: &SyncSpec) -> SyncResult<Dispatch> {
        let Some(remote_id) = present_remote_id(entity) else {
            return Ok(Dispatch::Skipped);
        };

        let settings = self.settings()?;
        if settings.background_mode {
            match &self.queue {
                Some(queue) => {
                    let task = DeferredTask::remove(entity.entity_type(), entity.id(), &spec.object_type, remote_id);
                    let task_id = task.id;
                    queue.submit(task).await?;
                    debug!(object_type = %spec.object_type, entity_id = %entity.id(), %task_id, "Removal enqueued");
                    return Ok(Dispatch::Enqueued(task_id));
                }
                None => {
                    warn!(
                        object_type = %spec.object_type,
                        "Background mode enabled but no task queue attached, removing inline"
                    );
                }
            }
        }

        self.remove_now(entity, spec).await.map(Dispatch::Completed)
    }

    /// Deletes a remote record by id. A missing record counts as removed.
    pub async fn remove_remote(&self, object_type: &str, remote_id: &str) -> SyncResult<SyncOutcome> {
        let client = self.config.client()?;

        match client.delete(object_type, remote_id).await {
            Ok(()) => {
                info!(object_type, remote_id, "Remote record removed");
                Ok(SyncOutcome::removed(Some(remote_id.to_string())))
            }
            Err(e) if e.is_not_found() => {
                info!(object_type, remote_id, "Remote record already gone");
                Ok(SyncOutcome::removed(Some(remote_id.to_string())))
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Lifecycle Events
    // =========================================================================

    /// Routes a host lifecycle event through the sync policy.
    pub async fn handle_event(
        &self,
        event: LifecycleEvent,
        entity: &mut dyn Entity,
        spec: &SyncSpec,
    ) -> SyncResult<Dispatch> {
        let settings = self.settings()?;

        match event {
            LifecycleEvent::Created | LifecycleEvent::Updated => {
                match should_sync(&*entity, spec, &settings) {
                    Ok(true) => self.sync(entity, spec).await,
                    Ok(false) => Ok(Dispatch::Skipped),
                    Err(e) => {
                        warn!(object_type = %spec.object_type, entity_id = %entity.id(), error = %e, "Sync condition failed, skipping");
                        Ok(Dispatch::Skipped)
                    }
                }
            }
            LifecycleEvent::Destroyed => {
                if should_remove(&*entity, &settings) {
                    self.remove(&*entity, spec).await
                } else {
                    Ok(Dispatch::Skipped)
                }
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn apply_transitions(
        &self,
        client: &dyn RemoteClient,
        entity: &dyn Entity,
        spec: &SyncSpec,
        remote_id: &str,
    ) -> SyncResult<()> {
        for rule in &spec.transition_rules {
            if !rule.applies(entity) {
                continue;
            }

            let payload = rule.payload(entity);
            if payload.is_empty() {
                continue;
            }

            debug!(rule = %rule.name, object_type = %spec.object_type, remote_id, "Applying transition update");
            client.update(&spec.object_type, remote_id, &payload).await?;
        }
        Ok(())
    }

    fn handle_failure(
        &self,
        error: SyncError,
        entity: &dyn Entity,
        spec: &SyncSpec,
        remote_id: Option<String>,
    ) -> SyncResult<SyncOutcome> {
        let info = ErrorInfo::from(&error);

        if let Some(handler) = &spec.error_handler {
            debug!(object_type = %spec.object_type, entity_id = %entity.id(), kind = %info.kind, "Delegating sync failure to error handler");
            handler(&info, entity)?;
            return Ok(SyncOutcome::failed(remote_id, info));
        }

        error!(
            object_type = %spec.object_type,
            entity_id = %entity.id(),
            kind = %info.kind,
            error = %error,
            "Sync failed"
        );

        let strict = self.settings()?.execution_mode.is_strict();
        if strict || error.is_authentication() || in_deferred_task() {
            return Err(error);
        }

        Ok(SyncOutcome::failed(remote_id, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttioConfig;
    use crate::jobs::{run_deferred, TaskAction};
    use crate::testing::{assert_no_sync, assert_remove_called, assert_sync_called, RecordingQueue, StubClient};
    use attio_core::{
        CoreError, ErrorKind, ExecutionMode, Payload, Record, RemoteError, SyncStatus, TransitionRule,
    };
    use serde_json::json;
    use std::sync::Mutex;

    fn registry(stub: &Arc<StubClient>, mutate: impl FnOnce(&mut AttioConfig)) -> Arc<ConfigurationRegistry> {
        let mut config = AttioConfig::default();
        config.api.api_key = Some("sk_test".into());
        config.api.rate_limit_retries = false;
        mutate(&mut config);
        Arc::new(ConfigurationRegistry::new(config, stub.factory()))
    }

    fn executor(stub: &Arc<StubClient>, mode: ExecutionMode) -> SyncExecutor {
        SyncExecutor::new(registry(stub, |c| c.sync.execution_mode = mode))
    }

    fn people_spec() -> SyncSpec {
        SyncSpec::builder("people")
            .map_field("email_addresses", "email")
            .map_field("name", "name")
            .build()
    }

    fn user() -> Record {
        Record::new("User", "1").with_field("email", json!("a@b.com"))
    }

    #[tokio::test]
    async fn test_create_records_remote_id_then_updates() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create(json!({"data": {"id": {"record_id": "rec_42"}}}));
        let executor = executor(&stub, ExecutionMode::Lenient);
        let spec = people_spec();
        let mut entity = user();

        let first = executor.sync_now(&mut entity, &spec).await.unwrap();
        assert_eq!(first, SyncOutcome::created("rec_42"));
        assert_eq!(entity.remote_id().as_deref(), Some("rec_42"));

        let second = executor.sync_now(&mut entity, &spec).await.unwrap();
        assert_eq!(second.status, SyncStatus::Updated);

        let calls = stub.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, "create");
        assert_eq!(calls[0].payload, json!({"email_addresses": "a@b.com"}));
        assert_eq!(calls[1].operation, "update");
        assert_eq!(calls[1].record_id.as_deref(), Some("rec_42"));
        assert_sync_called(&stub, "people");
    }

    #[tokio::test]
    async fn test_strict_mode_raises_without_handler() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create_error(RemoteError::Other("boom".into()));
        let executor = executor(&stub, ExecutionMode::Strict);

        let result = executor.sync_now(&mut user(), &people_spec()).await;
        assert!(matches!(result, Err(SyncError::Remote(RemoteError::Other(_)))));
    }

    #[tokio::test]
    async fn test_lenient_mode_returns_failed_outcome() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create_error(RemoteError::Other("boom".into()));
        let executor = executor(&stub, ExecutionMode::Lenient);
        let mut entity = user();

        let outcome = executor.sync_now(&mut entity, &people_spec()).await.unwrap();
        assert_eq!(outcome.status, SyncStatus::Failed);
        assert_eq!(outcome.error.as_ref().map(|e| e.kind), Some(ErrorKind::Generic));
        assert_eq!(entity.remote_id(), None);
    }

    #[tokio::test]
    async fn test_authentication_errors_always_raise() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create_error(RemoteError::Authentication("revoked".into()));
        let executor = executor(&stub, ExecutionMode::Lenient);

        let result = executor.sync_now(&mut user(), &people_spec()).await;
        assert!(matches!(result, Err(ref e) if e.is_authentication()));
    }

    #[tokio::test]
    async fn test_deferred_context_raises_in_lenient_mode() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create_error(RemoteError::Server {
            status: 502,
            message: "bad gateway".into(),
        });
        let executor = executor(&stub, ExecutionMode::Lenient);
        let spec = people_spec();
        let mut entity = user();

        let result = run_deferred(executor.sync_now(&mut entity, &spec)).await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));
    }

    #[tokio::test]
    async fn test_error_handler_owns_failure() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create_error(RemoteError::Validation("email invalid".into()));
        let executor = executor(&stub, ExecutionMode::Strict);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let spec = SyncSpec::builder("people")
            .map_field("email_addresses", "email")
            .on_error(move |info, entity| {
                sink.lock().unwrap().push((info.kind, entity.id()));
                Ok(())
            })
            .build();

        let outcome = executor.sync_now(&mut user(), &spec).await.unwrap();
        assert_eq!(outcome.status, SyncStatus::Failed);
        assert_eq!(*seen.lock().unwrap(), vec![(ErrorKind::Validation, "1".to_string())]);
    }

    #[tokio::test]
    async fn test_error_handler_can_reraise() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create_error(RemoteError::Other("boom".into()));
        let executor = executor(&stub, ExecutionMode::Lenient);

        let spec = SyncSpec::builder("people")
            .map_field("email_addresses", "email")
            .on_error(|info, _| Err(CoreError::Handler(info.message.clone())))
            .build();

        let result = executor.sync_now(&mut user(), &spec).await;
        assert!(matches!(result, Err(SyncError::Core(CoreError::Handler(_)))));
    }

    #[tokio::test]
    async fn test_before_hook_failure_routes_through_handler() {
        let stub = Arc::new(StubClient::new());
        let executor = executor(&stub, ExecutionMode::Lenient);

        let handled = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&handled);
        let spec = SyncSpec::builder("people")
            .map_field("email_addresses", "email")
            .before_sync(|_| Err(CoreError::Hook("not ready".into())))
            .on_error(move |_, _| {
                *counter.lock().unwrap() += 1;
                Ok(())
            })
            .build();

        let outcome = executor.sync_now(&mut user(), &spec).await.unwrap();
        assert_eq!(outcome.status, SyncStatus::Failed);
        assert_eq!(*handled.lock().unwrap(), 1);
        assert_no_sync(&stub);
    }

    #[tokio::test]
    async fn test_after_hook_sees_outcome() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create(json!({"id": {"record_id": "rec_7"}}));
        let executor = executor(&stub, ExecutionMode::Strict);

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let spec = SyncSpec::builder("people")
            .map_field("email_addresses", "email")
            .after_sync(move |_, outcome| {
                *sink.lock().unwrap() = outcome.remote_id.clone();
                Ok(())
            })
            .build();

        executor.sync_now(&mut user(), &spec).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("rec_7"));
    }

    #[tokio::test]
    async fn test_create_without_record_id_fails() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create(json!({"data": {}}));
        let executor = executor(&stub, ExecutionMode::Strict);

        let result = executor.sync_now(&mut user(), &people_spec()).await;
        assert!(matches!(result, Err(SyncError::MissingRemoteId { .. })));
    }

    #[tokio::test]
    async fn test_missing_api_key_raises() {
        let stub = Arc::new(StubClient::new());
        let config = registry(&stub, |c| c.api.api_key = None);
        let executor = SyncExecutor::new(config);

        let result = executor.sync_now(&mut user(), &people_spec()).await;
        assert!(matches!(result, Err(SyncError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_transition_rules_send_partial_updates() {
        let stub = Arc::new(StubClient::new());
        let executor = executor(&stub, ExecutionMode::Strict);

        let spec = SyncSpec::builder("deals")
            .map_field("name", "name")
            .transition(TransitionRule::new(
                "stage_changed",
                |e| e.field("stage_changed") == Some(json!(true)),
                |e| {
                    let mut payload = Payload::new();
                    payload.insert("stage".into(), e.field("stage").unwrap_or_default());
                    payload
                },
            ))
            .transition(TransitionRule::new("won", |_| false, |_| Payload::new()))
            .build();

        let mut deal = Record::new("Deal", "5")
            .with_remote_id("rec_deal")
            .with_field("name", json!("Big"))
            .with_field("stage", json!("negotiation"))
            .with_field("stage_changed", json!(true));

        let outcome = executor.sync_now(&mut deal, &spec).await.unwrap();
        assert_eq!(outcome, SyncOutcome::updated("rec_deal"));

        let updates = stub.calls_to("update");
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].payload, json!({"stage": "negotiation"}));
    }

    #[tokio::test]
    async fn test_background_mode_enqueues() {
        let stub = Arc::new(StubClient::new());
        let queue = Arc::new(RecordingQueue::new());
        let executor = SyncExecutor::with_queue(registry(&stub, |c| c.sync.background_mode = true), queue.clone());

        let dispatch = executor.sync(&mut user(), &people_spec()).await.unwrap();
        assert!(matches!(dispatch, Dispatch::Enqueued(_)));
        assert_no_sync(&stub);

        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].action, TaskAction::Sync);
        assert_eq!(tasks[0].entity_type, "User");
        assert_eq!(tasks[0].entity_id, "1");
    }

    #[tokio::test]
    async fn test_background_mode_without_queue_runs_inline() {
        let stub = Arc::new(StubClient::new());
        let executor = SyncExecutor::new(registry(&stub, |c| c.sync.background_mode = true));

        let dispatch = executor.sync(&mut user(), &people_spec()).await.unwrap();
        assert_eq!(dispatch.outcome().map(|o| o.status), Some(SyncStatus::Created));
    }

    #[tokio::test]
    async fn test_remove_treats_not_found_as_success() {
        let stub = Arc::new(StubClient::new());
        stub.stub_delete_error(RemoteError::NotFound("rec_1".into()));
        let executor = executor(&stub, ExecutionMode::Strict);
        let entity = user().with_remote_id("rec_1");

        let outcome = executor.remove_now(&entity, &people_spec()).await.unwrap();
        assert_eq!(outcome.status, SyncStatus::Removed);
        assert_remove_called(&stub, "people", "rec_1");
    }

    #[tokio::test]
    async fn test_remove_without_remote_id_is_skipped() {
        let stub = Arc::new(StubClient::new());
        let executor = executor(&stub, ExecutionMode::Strict);

        assert_eq!(executor.remove(&user(), &people_spec()).await.unwrap(), Dispatch::Skipped);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_background_remove_carries_remote_reference() {
        let stub = Arc::new(StubClient::new());
        let queue = Arc::new(RecordingQueue::new());
        let executor = SyncExecutor::with_queue(registry(&stub, |c| c.sync.background_mode = true), queue.clone());

        let entity = user().with_remote_id("rec_9");
        executor.remove(&entity, &people_spec()).await.unwrap();

        let tasks = queue.tasks();
        assert_eq!(tasks[0].action, TaskAction::Remove);
        assert_eq!(tasks[0].object_type.as_deref(), Some("people"));
        assert_eq!(tasks[0].remote_id.as_deref(), Some("rec_9"));
    }

    #[tokio::test]
    async fn test_handle_event_respects_policy() {
        let stub = Arc::new(StubClient::new());
        let executor = executor(&stub, ExecutionMode::Strict);
        let gated = SyncSpec::builder("people")
            .map_field("email_addresses", "email")
            .when_method("missing?")
            .build();

        let skipped = executor
            .handle_event(LifecycleEvent::Created, &mut user(), &gated)
            .await
            .unwrap();
        assert_eq!(skipped, Dispatch::Skipped);

        let destroyed = executor
            .handle_event(LifecycleEvent::Destroyed, &mut user(), &people_spec())
            .await
            .unwrap();
        assert_eq!(destroyed, Dispatch::Skipped);
        assert!(stub.calls().is_empty());

        let created = executor
            .handle_event(LifecycleEvent::Created, &mut user(), &people_spec())
            .await
            .unwrap();
        assert!(matches!(created, Dispatch::Completed(_)));
    }

    #[tokio::test]
    async fn test_disabled_sync_skips_events() {
        let stub = Arc::new(StubClient::new());
        let executor = SyncExecutor::new(registry(&stub, |c| c.sync.sync_enabled = false));

        let mut linked = user().with_remote_id("rec_1");
        for event in [LifecycleEvent::Updated, LifecycleEvent::Destroyed] {
            let dispatch = executor.handle_event(event, &mut linked, &people_spec()).await.unwrap();
            assert_eq!(dispatch, Dispatch::Skipped);
        }
        assert!(stub.calls().is_empty());
    }
}
