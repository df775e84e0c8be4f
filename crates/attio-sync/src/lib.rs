//! # attio-sync: Sync Orchestration for Attio
//!
//! This crate turns record lifecycle events into remote CRM calls: single
//! record create/update/delete, bulk batches with per-record accounting,
//! rate-limit handling and deferred background work.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Layer Architecture                          │
//! │                                                                         │
//! │  host lifecycle hook ──► SyncExecutor::handle_event                     │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  SyncExecutor (executor.rs)                      │  │
//! │  │                                                                  │  │
//! │  │  should_sync? ──► background_mode? ──► TaskQueue::submit         │  │
//! │  │                         │ no                                     │  │
//! │  │                         ▼                                        │  │
//! │  │  before hook ──► map_attributes ──► create / update ──► after   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │BatchOrchestrator│ │ RateLimited    │  │  WorkerQueue           │    │
//! │  │                │  │ Client         │  │                        │    │
//! │  │ Chunks input   │  │ Sleeps on 429  │  │ Delayed tasks, retry   │    │
//! │  │ Bulk or single │  │ up to N times  │  │ per error kind,        │    │
//! │  │ calls, tallies │  │ (not in tasks) │  │ re-fetches entities    │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              ▼                                          │
//! │                  RemoteClient (host supplied)                           │
//! │                                                                         │
//! │  ConfigurationRegistry: credentials + settings, lazily built client    │
//! │  ModelRegistry: entity type ──► SyncSpec, host EntityStore             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`client`] - `RemoteClient` trait and bulk types
//! - [`config`] - Configuration file, env overrides, `ConfigurationRegistry`
//! - [`guard`] - Rate-limit retry guard and guarded client
//! - [`executor`] - Single-record sync/remove
//! - [`batch`] - Bulk operations
//! - [`jobs`] - Deferred tasks, retry policy and worker queue
//! - [`models`] - Entity type registrations
//! - [`workspace`] - Workspace metadata and lookups
//! - [`error`] - Error types
//!
//! ## Wiring
//!
//! ```rust,ignore
//! let config = Arc::new(ConfigurationRegistry::new(AttioConfig::load_or_default(None), factory));
//! let models = Arc::new(ModelRegistry::new(store));
//! models.register("User", SyncSpec::builder("people").map_field("email_addresses", "email").build())?;
//!
//! let (queue, receiver) = WorkerQueue::channel(256);
//! let executor = Arc::new(SyncExecutor::with_queue(config.clone(), Arc::new(queue)));
//! let runner = Arc::new(TaskRunner::new(executor.clone(), models.clone()));
//! let worker = receiver.spawn(runner, JobRetryPolicy::default());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod jobs;
pub mod models;
pub mod workspace;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use batch::{BatchOptions, BatchOrchestrator};
pub use client::{record_id_from_response, BulkRecord, BulkResponse, ClientFactory, RemoteClient};
pub use config::{ApiSettings, AttioConfig, ConfigurationRegistry};
pub use error::{SyncError, SyncResult};
pub use executor::{Dispatch, SyncExecutor};
pub use guard::{RateLimitGuard, RateLimitedClient};
pub use jobs::{
    in_deferred_task, run_deferred, BackoffStrategy, DeferredTask, JobRetryPolicy, RetryDecision, TaskAction,
    TaskHandler, TaskQueue, TaskRunner, WorkerHandle, WorkerQueue, WorkerReceiver,
};
pub use models::{EntityStore, ModelRegistry};
pub use workspace::Workspace;
