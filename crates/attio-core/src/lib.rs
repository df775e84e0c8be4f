//! # attio-core: Pure Sync Logic
//!
//! This crate holds the deterministic half of the record-to-CRM sync layer:
//! what an entity looks like to the sync layer, how a [`SyncSpec`] maps it
//! to a payload, and when it should be synced or removed.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Attio Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Host Application                             │   │
//! │  │    after_create / after_update / after_destroy hooks            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    attio-sync (orchestration)                   │   │
//! │  │    SyncExecutor, BatchOrchestrator, RateLimitGuard, jobs       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ attio-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  entity   │  │   spec    │  │  mapping  │  │  policy   │  │   │
//! │  │   │  Entity   │  │ SyncSpec  │  │  payload  │  │ should_*  │  │   │
//! │  │   │  Record   │  │ Callback  │  │  builder  │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO SLEEPING                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`entity`] - The `Entity` trait and value helpers
//! - [`record`] - A map-backed `Entity`
//! - [`spec`] - `SyncSpec`, mapping rules, callbacks, conditions
//! - [`mapping`] - Attribute mapping
//! - [`policy`] - `should_sync` / `should_remove`
//! - [`settings`] - Sync behaviour settings
//! - [`types`] - Outcome and batch types
//! - [`error`] - Core and remote error types
//!
//! ## Example Usage
//!
//! ```rust
//! use attio_core::{map_attributes, should_sync, Record, SyncSettings, SyncSpec};
//! use serde_json::json;
//!
//! let spec = SyncSpec::builder("people")
//!     .map_field("email", "email")
//!     .map_field("name", "name")
//!     .build();
//!
//! let user = Record::new("User", "1").with_field("email", json!("a@b.com"));
//!
//! assert!(should_sync(&user, &spec, &SyncSettings::default()).unwrap());
//! let payload = map_attributes(&user, &spec).unwrap();
//! assert_eq!(payload.len(), 1); // name is nil, so it is omitted
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod entity;
pub mod error;
pub mod mapping;
pub mod policy;
pub mod record;
pub mod settings;
pub mod spec;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use entity::{is_nil, is_truthy, present_remote_id, Entity, Payload};
pub use error::{CoreError, CoreResult, ErrorKind, RemoteError, RemoteResult};
pub use mapping::map_attributes;
pub use policy::{should_remove, should_sync};
pub use record::Record;
pub use settings::{ExecutionMode, SyncSettings};
pub use spec::{Callback, Condition, MappingRule, SyncSpec, SyncSpecBuilder, TransitionRule};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Entities per batch when neither options nor settings say otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Rate-limit retries performed by the call guard.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff applied when a rate-limit error carries no retry-after hint.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Attribute used to match existing records on upsert.
pub const DEFAULT_UPSERT_MATCH_FIELD: &str = "email";
