//! # Rate-Limit Guard
//!
//! Bounded retry around remote calls that honours the server's retry-after
//! hint.
//!
//! ## Retry State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌────────────┐   Ok    ┌─────────┐                                     │
//! │  │ Attempting │ ──────► │ Success │                                     │
//! │  └─────┬──────┘         └─────────┘                                     │
//! │        │                                                                │
//! │        ├── other error ─────────────────────────► Propagate            │
//! │        │                                                                │
//! │        └── RateLimited ─┬─ retries < max_retries                       │
//! │                         │  and not inside a deferred task              │
//! │                         │        │                                      │
//! │                         │        ▼                                      │
//! │                         │   ┌─────────┐  sleep(retry_after or 60s)     │
//! │                         │   │ Waiting │ ─────────────► Attempting      │
//! │                         │   └─────────┘                                │
//! │                         │                                               │
//! │                         └─ otherwise ─► original RateLimited error     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inside a deferred task the worker's own retry policy handles rate limits,
//! so the guard hands the error straight back instead of sleeping twice.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use attio_core::{Payload, RemoteError, RemoteResult, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_AFTER_SECS};

use crate::client::{BulkRecord, BulkResponse, RemoteClient};
use crate::jobs::in_deferred_task;

// =============================================================================
// Guard
// =============================================================================

/// Bounded rate-limit retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitGuard {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Wait used when the error carries no retry-after hint.
    pub default_retry_after: Duration,
}

impl Default for RateLimitGuard {
    fn default() -> Self {
        RateLimitGuard {
            max_retries: DEFAULT_MAX_RETRIES,
            default_retry_after: Duration::from_secs(DEFAULT_RETRY_AFTER_SECS),
        }
    }
}

impl RateLimitGuard {
    pub fn new(max_retries: u32, default_retry_after: Duration) -> Self {
        RateLimitGuard {
            max_retries,
            default_retry_after,
        }
    }

    /// How long to wait before retrying after `error`.
    pub fn delay_for(&self, error: &RemoteError) -> Duration {
        error.retry_after().unwrap_or(self.default_retry_after)
    }

    /// Runs `f`, retrying rate-limited attempts.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut retries: u32 = 0;

        loop {
            match f().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(operation, retries, "Call succeeded after rate-limit retries");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_rate_limited() => {
                    if in_deferred_task() {
                        debug!(operation, "Rate limited inside deferred task, leaving retry to the worker");
                        return Err(error);
                    }

                    if retries >= self.max_retries {
                        warn!(
                            operation,
                            retries,
                            max_retries = self.max_retries,
                            "Rate limit retries exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.delay_for(&error);
                    warn!(
                        operation,
                        attempt = retries + 1,
                        max_retries = self.max_retries,
                        delay_secs = delay.as_secs(),
                        "Rate limited, waiting before retry"
                    );

                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

// =============================================================================
// Rate-Limited Client
// =============================================================================

/// Decorator that runs every [`RemoteClient`] operation through a
/// [`RateLimitGuard`].
pub struct RateLimitedClient {
    inner: Arc<dyn RemoteClient>,
    guard: RateLimitGuard,
}

impl RateLimitedClient {
    pub fn new(inner: Arc<dyn RemoteClient>, guard: RateLimitGuard) -> Self {
        RateLimitedClient { inner, guard }
    }

    pub fn guard(&self) -> &RateLimitGuard {
        &self.guard
    }
}

#[async_trait]
impl RemoteClient for RateLimitedClient {
    async fn create(&self, object_type: &str, payload: &Payload) -> RemoteResult<Value> {
        let inner = &self.inner;
        self.guard
            .execute("create", move || inner.create(object_type, payload))
            .await
    }

    async fn update(&self, object_type: &str, record_id: &str, payload: &Payload) -> RemoteResult<Value> {
        let inner = &self.inner;
        self.guard
            .execute("update", move || inner.update(object_type, record_id, payload))
            .await
    }

    async fn delete(&self, object_type: &str, record_id: &str) -> RemoteResult<()> {
        let inner = &self.inner;
        self.guard
            .execute("delete", move || inner.delete(object_type, record_id))
            .await
    }

    async fn list(&self, object_type: &str, filter: &Payload) -> RemoteResult<Vec<Value>> {
        let inner = &self.inner;
        self.guard
            .execute("list", move || inner.list(object_type, filter))
            .await
    }

    async fn list_objects(&self) -> RemoteResult<Vec<Value>> {
        let inner = &self.inner;
        self.guard
            .execute("list_objects", move || inner.list_objects())
            .await
    }

    async fn list_attributes(&self, object_type: &str) -> RemoteResult<Vec<Value>> {
        let inner = &self.inner;
        self.guard
            .execute("list_attributes", move || inner.list_attributes(object_type))
            .await
    }

    fn supports_bulk(&self) -> bool {
        self.inner.supports_bulk()
    }

    async fn create_records(&self, object_type: &str, records: &[BulkRecord]) -> RemoteResult<BulkResponse> {
        let inner = &self.inner;
        self.guard
            .execute("create_records", move || inner.create_records(object_type, records))
            .await
    }

    async fn update_records(&self, object_type: &str, records: &[BulkRecord]) -> RemoteResult<BulkResponse> {
        let inner = &self.inner;
        self.guard
            .execute("update_records", move || inner.update_records(object_type, records))
            .await
    }

    async fn upsert_records(
        &self,
        object_type: &str,
        records: &[BulkRecord],
        match_attribute: &str,
    ) -> RemoteResult<BulkResponse> {
        let inner = &self.inner;
        self.guard
            .execute("upsert_records", move || {
                inner.upsert_records(object_type, records, match_attribute)
            })
            .await
    }

    async fn delete_records(&self, object_type: &str, record_ids: &[String]) -> RemoteResult<BulkResponse> {
        let inner = &self.inner;
        self.guard
            .execute("delete_records", move || inner.delete_records(object_type, record_ids))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubClient;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let guard = RateLimitGuard::default();
        let attempts = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let result = guard
            .execute("create", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::rate_limited(5))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_original_error() {
        let guard = RateLimitGuard::new(3, Duration::from_secs(60));
        let attempts = AtomicU32::new(0);

        let result: RemoteResult<()> = guard
            .execute("update", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::rate_limited(7))
            })
            .await;

        assert_eq!(result, Err(RemoteError::rate_limited(7)));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_hint_uses_default_wait() {
        let guard = RateLimitGuard::new(1, Duration::from_secs(60));
        let attempts = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let _ = guard
            .execute("list", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RemoteError::RateLimited {
                        retry_after: None,
                        message: "slow down".into(),
                    })
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_other_errors_propagate_without_retry() {
        let guard = RateLimitGuard::default();
        let attempts = AtomicU32::new(0);

        let result: RemoteResult<()> = guard
            .execute("create", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Validation("bad email".into()))
            })
            .await;

        assert_eq!(result, Err(RemoteError::Validation("bad email".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deferred_tasks_skip_guard_sleep() {
        let guard = RateLimitGuard::default();
        let attempts = AtomicU32::new(0);

        let result: RemoteResult<()> = crate::jobs::run_deferred(async {
            guard
                .execute("create", || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(RemoteError::rate_limited(60))
                })
                .await
        })
        .await;

        assert!(matches!(result, Err(RemoteError::RateLimited { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_decorator_wraps_calls() {
        let stub = Arc::new(StubClient::new());
        stub.stub_create_error(RemoteError::rate_limited(1));
        stub.stub_create(json!({"data": {"id": {"record_id": "rec_9"}}}));

        let client = RateLimitedClient::new(stub.clone(), RateLimitGuard::default());
        let body = client.create("people", &Payload::new()).await.unwrap();

        assert_eq!(body["data"]["id"]["record_id"], "rec_9");
        assert_eq!(stub.calls().len(), 2);
    }
}
