//! # Deferred Tasks
//!
//! Background execution of syncs and removals.
//!
//! ## Task Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Deferred Task Flow                               │
//! │                                                                         │
//! │  SyncExecutor / BatchOrchestrator                                      │
//! │        │                                                                │
//! │        │ submit(DeferredTask { Sync | Remove, entity_type, id, .. })   │
//! │        ▼                                                                │
//! │  ┌──────────────┐   mpsc    ┌────────────────────────────────────────┐ │
//! │  │ WorkerQueue  │ ────────► │ worker loop (WorkerReceiver::spawn)    │ │
//! │  └──────────────┘           │                                        │ │
//! │                             │  per task, on its own tokio task:      │ │
//! │                             │   1. sleep(delay)                      │ │
//! │                             │   2. run_deferred(handler.handle(t))   │ │
//! │                             │   3. Err → JobRetryPolicy::decide      │ │
//! │                             │        Retry(d)  sleep d, go to 2      │ │
//! │                             │        Discard   drop silently         │ │
//! │                             │        GiveUp    log and drop          │ │
//! │                             └────────────────────────────────────────┘ │
//! │                                                                         │
//! │  Inside run_deferred, in_deferred_task() is true: the rate-limit guard │
//! │  stops sleeping and the executor re-raises failures so that the        │
//! │  policy above owns retries.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Default Retry Policy
//! ```text
//! ┌─────────────────┬──────────────┬────────────────────────────────────┐
//! │ Error kind      │ Max attempts │ Wait                               │
//! ├─────────────────┼──────────────┼────────────────────────────────────┤
//! │ RateLimit       │ 5            │ server retry-after, else 60s       │
//! │ Server          │ 3            │ exponential, 1s doubling to 60s    │
//! │ EntityNotFound  │ -            │ discarded                          │
//! │ anything else   │ 1            │ not retried                        │
//! └─────────────────┴──────────────┴────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use attio_core::{should_sync, ErrorKind, SyncOutcome, DEFAULT_RETRY_AFTER_SECS};

use crate::error::{SyncError, SyncResult};
use crate::executor::SyncExecutor;
use crate::models::ModelRegistry;

// =============================================================================
// Deferred Context
// =============================================================================

tokio::task_local! {
    static DEFERRED: ();
}

/// True while running inside a deferred task.
pub fn in_deferred_task() -> bool {
    DEFERRED.try_with(|_| ()).is_ok()
}

/// Runs `future` in deferred-task context.
pub async fn run_deferred<F: Future>(future: F) -> F::Output {
    DEFERRED.scope((), future).await
}

// =============================================================================
// Deferred Task
// =============================================================================

/// What a deferred task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    /// Re-fetch the entity and sync it.
    Sync,
    /// Delete the remote record.
    Remove,
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAction::Sync => write!(f, "sync"),
            TaskAction::Remove => write!(f, "remove"),
        }
    }
}

/// A unit of background work. Carries references, never entity state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredTask {
    pub id: Uuid,
    pub action: TaskAction,
    pub entity_type: String,
    pub entity_id: String,

    /// Remote object type, carried by removals since the entity may be gone.
    #[serde(default)]
    pub object_type: Option<String>,

    #[serde(default)]
    pub remote_id: Option<String>,

    /// Wait before the first attempt.
    #[serde(default)]
    pub delay: Option<Duration>,

    /// Attempts made so far.
    #[serde(default)]
    pub attempt: u32,

    pub enqueued_at: DateTime<Utc>,
}

impl DeferredTask {
    fn new(action: TaskAction, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        DeferredTask {
            id: Uuid::new_v4(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            object_type: None,
            remote_id: None,
            delay: None,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn sync(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(TaskAction::Sync, entity_type, entity_id)
    }

    pub fn remove(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        object_type: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Self {
        let mut task = Self::new(TaskAction::Remove, entity_type, entity_id);
        task.object_type = Some(object_type.into());
        task.remote_id = Some(remote_id.into());
        task
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

// =============================================================================
// Queue Traits
// =============================================================================

/// Accepts deferred tasks. Implemented by [`WorkerQueue`] and by hosts that
/// bridge to their own job system.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn submit(&self, task: DeferredTask) -> SyncResult<()>;
}

/// Executes one deferred task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &DeferredTask) -> SyncResult<()>;
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Wait between job attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    Fixed(Duration),
    /// `attempt^4 + 2` seconds.
    Polynomial,
    Exponential { initial: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Wait after the given 1-based attempt failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Polynomial => {
                let n = u64::from(attempt.max(1));
                Duration::from_secs(n.saturating_pow(4).saturating_add(2))
            }
            BackoffStrategy::Exponential { initial, max } => {
                let mut backoff = ExponentialBackoff {
                    initial_interval: *initial,
                    current_interval: *initial,
                    max_interval: *max,
                    multiplier: 2.0,
                    randomization_factor: 0.0,
                    max_elapsed_time: None,
                    ..Default::default()
                };
                let mut delay = *initial;
                for _ in 0..attempt.max(1) {
                    delay = backoff.next_backoff().unwrap_or(*max);
                }
                delay
            }
        }
    }
}

/// Retry budget for one error kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRule {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

/// What to do with a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Discard,
    GiveUp,
}

/// Per-error-kind retry rules for deferred tasks.
#[derive(Debug, Clone)]
pub struct JobRetryPolicy {
    rules: HashMap<ErrorKind, RetryRule>,
}

impl Default for JobRetryPolicy {
    fn default() -> Self {
        JobRetryPolicy::empty()
            .retry_on(
                ErrorKind::RateLimit,
                5,
                BackoffStrategy::Fixed(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)),
            )
            .retry_on(
                ErrorKind::Server,
                3,
                BackoffStrategy::Exponential {
                    initial: Duration::from_secs(1),
                    max: Duration::from_secs(60),
                },
            )
    }
}

impl JobRetryPolicy {
    /// A policy that never retries.
    pub fn empty() -> Self {
        JobRetryPolicy {
            rules: HashMap::new(),
        }
    }

    pub fn retry_on(mut self, kind: ErrorKind, max_attempts: u32, backoff: BackoffStrategy) -> Self {
        self.rules.insert(kind, RetryRule { max_attempts, backoff });
        self
    }

    pub fn rule(&self, kind: ErrorKind) -> Option<&RetryRule> {
        self.rules.get(&kind)
    }

    /// Decides what happens after `attempt` (1-based) failed with `error`.
    pub fn decide(&self, error: &SyncError, attempt: u32) -> RetryDecision {
        if error.is_discardable() {
            return RetryDecision::Discard;
        }

        let kind = error.kind();
        let Some(rule) = self.rules.get(&kind) else {
            return RetryDecision::GiveUp;
        };

        if attempt >= rule.max_attempts {
            return RetryDecision::GiveUp;
        }

        let hinted = match kind {
            ErrorKind::RateLimit => error.as_remote().and_then(|remote| remote.retry_after()),
            _ => None,
        };

        RetryDecision::Retry(hinted.unwrap_or_else(|| rule.backoff.delay(attempt)))
    }
}

// =============================================================================
// Task Runner
// =============================================================================

/// Performs deferred syncs and removals against the registered models.
pub struct TaskRunner {
    executor: Arc<SyncExecutor>,
    models: Arc<ModelRegistry>,
}

impl TaskRunner {
    pub fn new(executor: Arc<SyncExecutor>, models: Arc<ModelRegistry>) -> Self {
        TaskRunner { executor, models }
    }

    /// Runs one task.
    ///
    /// Syncs re-fetch the entity and re-check the policy, since it may have
    /// changed since the task was queued.
    pub async fn perform(&self, task: &DeferredTask) -> SyncResult<SyncOutcome> {
        match task.action {
            TaskAction::Sync => {
                let spec = self.models.spec_for(&task.entity_type)?;
                let mut entity = self.models.find(&task.entity_type, &task.entity_id).await?;

                let settings = self.executor.settings()?;
                match should_sync(entity.as_ref(), &spec, &settings) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(entity_type = %task.entity_type, entity_id = %task.entity_id, "Sync no longer wanted");
                        return Ok(SyncOutcome::skipped());
                    }
                    Err(e) => {
                        warn!(entity_type = %task.entity_type, entity_id = %task.entity_id, error = %e, "Sync condition failed, skipping");
                        return Ok(SyncOutcome::skipped());
                    }
                }

                self.executor.sync_now(entity.as_mut(), &spec).await
            }
            TaskAction::Remove => {
                let Some(remote_id) = task.remote_id.as_deref().filter(|id| !id.is_empty()) else {
                    debug!(entity_type = %task.entity_type, entity_id = %task.entity_id, "Remove task without remote id");
                    return Ok(SyncOutcome::skipped());
                };

                let object_type = match task.object_type.clone() {
                    Some(object_type) => object_type,
                    None => self.models.spec_for(&task.entity_type)?.object_type.clone(),
                };

                self.executor.remove_remote(&object_type, remote_id).await
            }
        }
    }
}

#[async_trait]
impl TaskHandler for TaskRunner {
    async fn handle(&self, task: &DeferredTask) -> SyncResult<()> {
        let outcome = self.perform(task).await?;
        debug!(task_id = %task.id, action = %task.action, status = %outcome.status, "Deferred task finished");
        Ok(())
    }
}

// =============================================================================
// Worker Queue
// =============================================================================

/// In-process tokio queue. Cloning shares the channel.
#[derive(Clone)]
pub struct WorkerQueue {
    tx: mpsc::Sender<DeferredTask>,
}

/// Receiving half, turned into a worker with [`WorkerReceiver::spawn`].
pub struct WorkerReceiver {
    rx: mpsc::Receiver<DeferredTask>,
}

impl WorkerQueue {
    /// Creates the queue. Spawn the receiver once the handler (which usually
    /// holds an executor that submits to this queue) exists.
    pub fn channel(capacity: usize) -> (WorkerQueue, WorkerReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (WorkerQueue { tx }, WorkerReceiver { rx })
    }
}

#[async_trait]
impl TaskQueue for WorkerQueue {
    async fn submit(&self, task: DeferredTask) -> SyncResult<()> {
        debug!(task_id = %task.id, action = %task.action, entity_type = %task.entity_type, entity_id = %task.entity_id, "Submitting deferred task");
        self.tx
            .send(task)
            .await
            .map_err(|_| SyncError::ChannelError("Worker queue closed".into()))
    }
}

/// Handle for controlling the worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops accepting tasks, aborts in-flight ones and waits for the loop.
    pub async fn shutdown(self) -> SyncResult<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.join
            .await
            .map_err(|e| SyncError::Internal(format!("Worker loop failed: {}", e)))
    }
}

impl WorkerReceiver {
    /// Spawns the worker loop.
    pub fn spawn(self, handler: Arc<dyn TaskHandler>, policy: JobRetryPolicy) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(worker_loop(self.rx, shutdown_rx, handler, Arc::new(policy)));
        WorkerHandle { shutdown_tx, join }
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<DeferredTask>,
    mut shutdown_rx: mpsc::Receiver<()>,
    handler: Arc<dyn TaskHandler>,
    policy: Arc<JobRetryPolicy>,
) {
    let mut running = JoinSet::new();
    info!("Deferred task worker started");

    loop {
        tokio::select! {
            task = rx.recv() => match task {
                Some(task) => {
                    running.spawn(run_task(task, Arc::clone(&handler), Arc::clone(&policy)));
                }
                None => {
                    debug!("All queue senders dropped");
                    while running.join_next().await.is_some() {}
                    break;
                }
            },
            Some(_) = running.join_next(), if !running.is_empty() => {}
            Some(()) = shutdown_rx.recv() => {
                if !running.is_empty() {
                    warn!(in_flight = running.len(), "Aborting in-flight deferred tasks");
                }
                running.shutdown().await;
                break;
            }
        }
    }

    info!("Deferred task worker stopped");
}

async fn run_task(mut task: DeferredTask, handler: Arc<dyn TaskHandler>, policy: Arc<JobRetryPolicy>) {
    if let Some(delay) = task.delay {
        tokio::time::sleep(delay).await;
    }

    loop {
        task.attempt += 1;

        let error = match run_deferred(handler.handle(&task)).await {
            Ok(()) => return,
            Err(e) => e,
        };

        match policy.decide(&error, task.attempt) {
            RetryDecision::Retry(wait) => {
                warn!(
                    task_id = %task.id,
                    action = %task.action,
                    attempt = task.attempt,
                    wait_secs = wait.as_secs(),
                    error = %error,
                    "Deferred task failed, retrying"
                );
                tokio::time::sleep(wait).await;
            }
            RetryDecision::Discard => {
                debug!(task_id = %task.id, error = %error, "Deferred task discarded");
                return;
            }
            RetryDecision::GiveUp => {
                error!(
                    task_id = %task.id,
                    action = %task.action,
                    entity_type = %task.entity_type,
                    entity_id = %task.entity_id,
                    attempt = task.attempt,
                    error = %error,
                    "Deferred task failed"
                );
                return;
            }
        }
    }
}

/// Serializes a task for hosts that persist queues externally.
pub fn encode_task(task: &DeferredTask) -> SyncResult<Value> {
    Ok(serde_json::to_value(task)?)
}

/// Inverse of [`encode_task`].
pub fn decode_task(value: Value) -> SyncResult<DeferredTask> {
    Ok(serde_json::from_value(value)?)
}
