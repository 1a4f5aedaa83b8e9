//! Idempotent execution of import steps, keyed by a stable import key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, trace, warn};

use crate::BoxFuture;
use crate::error::{ImportError, TransferResult};

/// A recorded producer failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub key: String,
    pub display_name: String,
    pub error: ImportError,
}

/// Runs import producers at most once per key and remembers their
/// results for the rest of the job.
///
/// A key whose producer succeeded is never run again; its value is
/// returned from the cache. A key whose producer failed is recorded in
/// the failure log and may be attempted again by a later pass.
pub trait IdempotentImportExecutor: Send + Sync {
    /// Runs `producer` unless `key` is cached.
    ///
    /// Item-level failures are recorded and yield `Ok(None)`. Fatal
    /// failures (auth, quota, configuration) are recorded and returned.
    fn execute_and_swallow<'a>(
        &'a self,
        key: &'a str,
        display_name: &'a str,
        producer: BoxFuture<'a, TransferResult<String>>,
    ) -> BoxFuture<'a, TransferResult<Option<String>>>;

    /// Runs `producer` unless `key` is cached, returning any failure.
    fn execute_or_throw<'a>(
        &'a self,
        key: &'a str,
        display_name: &'a str,
        producer: BoxFuture<'a, TransferResult<String>>,
    ) -> BoxFuture<'a, TransferResult<String>>;

    /// Returns the value cached for `key`, if its producer succeeded.
    fn get_cached_value(&self, key: &str) -> Option<String>;

    fn is_key_cached(&self, key: &str) -> bool {
        self.get_cached_value(key).is_some()
    }

    /// Returns the failure log, in the order failures were first seen.
    fn errors(&self) -> Vec<ImportFailure>;

    /// Returns the recorded failure for `key`, if any.
    fn error_for(&self, key: &str) -> Option<ImportFailure> {
        self.errors().into_iter().find(|f| f.key == key)
    }
}

/// Job-scoped in-memory executor.
///
/// Distinct keys run concurrently; calls for the same key are serialized
/// on a per-key lock.
#[derive(Debug, Default)]
pub struct InMemoryImportExecutor {
    cache: RwLock<HashMap<String, String>>,
    failures: Mutex<Vec<ImportFailure>>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InMemoryImportExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.to_string()).or_default().clone()
    }

    fn record_success(&self, key: &str, value: &str) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|f| f.key != key);
    }

    fn record_failure(&self, key: &str, display_name: &str, error: ImportError) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let failure = ImportFailure {
            key: key.to_string(),
            display_name: display_name.to_string(),
            error,
        };
        match failures.iter_mut().find(|f| f.key == key) {
            Some(existing) => *existing = failure,
            None => failures.push(failure),
        }
    }

    async fn run<'a>(
        &'a self,
        key: &'a str,
        display_name: &'a str,
        producer: BoxFuture<'a, TransferResult<String>>,
    ) -> TransferResult<String> {
        if let Some(value) = self.get_cached_value(key) {
            trace!(key = %key, "import key already cached");
            return Ok(value);
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        // Another caller may have finished this key while we waited.
        if let Some(value) = self.get_cached_value(key) {
            trace!(key = %key, "import key cached by a concurrent caller");
            return Ok(value);
        }

        match producer.await {
            Ok(value) => {
                debug!(key = %key, name = %display_name, "imported item");
                self.record_success(key, &value);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(key, display_name, ImportError::from(&e));
                Err(e)
            }
        }
    }
}

impl IdempotentImportExecutor for InMemoryImportExecutor {
    fn execute_and_swallow<'a>(
        &'a self,
        key: &'a str,
        display_name: &'a str,
        producer: BoxFuture<'a, TransferResult<String>>,
    ) -> BoxFuture<'a, TransferResult<Option<String>>> {
        Box::pin(async move {
            match self.run(key, display_name, producer).await {
                Ok(value) => Ok(Some(value)),
                Err(e) if e.is_fatal() => Err(e),
                Err(e) => {
                    warn!(key = %key, name = %display_name, error = %e, "import failed, continuing");
                    Ok(None)
                }
            }
        })
    }

    fn execute_or_throw<'a>(
        &'a self,
        key: &'a str,
        display_name: &'a str,
        producer: BoxFuture<'a, TransferResult<String>>,
    ) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(self.run(key, display_name, producer))
    }

    fn get_cached_value(&self, key: &str) -> Option<String> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn errors(&self) -> Vec<ImportFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::{TransferError, TransferErrorCode};

    fn ok(value: &str) -> BoxFuture<'static, TransferResult<String>> {
        let value = value.to_string();
        Box::pin(async move { Ok(value) })
    }

    fn fail(err: TransferError) -> BoxFuture<'static, TransferResult<String>> {
        Box::pin(async move { Err(err) })
    }

    #[tokio::test]
    async fn caches_successful_values() {
        let executor = InMemoryImportExecutor::new();
        let first = executor
            .execute_and_swallow("A1", "Album 1", ok("/r/Album 1/"))
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("/r/Album 1/"));
        assert!(executor.is_key_cached("A1"));

        let second = executor
            .execute_and_swallow("A1", "Album 1", ok("/r/other/"))
            .await
            .unwrap();
        assert_eq!(second.as_deref(), Some("/r/Album 1/"));
        assert_eq!(executor.get_cached_value("missing"), None);
    }

    #[tokio::test]
    async fn swallows_and_records_item_failures() {
        let executor = InMemoryImportExecutor::new();
        let result = executor
            .execute_and_swallow(
                "P1",
                "photo.jpg",
                fail(TransferError::remote_request("boom").with_status(500)),
            )
            .await
            .unwrap();
        assert_eq!(result, None);
        assert!(!executor.is_key_cached("P1"));

        let failure = executor.error_for("P1").unwrap();
        assert_eq!(failure.display_name, "photo.jpg");
        assert_eq!(failure.error.code, TransferErrorCode::RemoteRequest);
        assert_eq!(executor.errors().len(), 1);
    }

    #[tokio::test]
    async fn fatal_failures_propagate() {
        let executor = InMemoryImportExecutor::new();
        let err = executor
            .execute_and_swallow("P5", "five", fail(TransferError::quota_exceeded("full")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::QuotaExceeded);
        assert_eq!(
            executor.error_for("P5").unwrap().error.code,
            TransferErrorCode::QuotaExceeded
        );
    }

    #[tokio::test]
    async fn execute_or_throw_returns_item_failures() {
        let executor = InMemoryImportExecutor::new();
        let err = executor
            .execute_or_throw("K", "k", fail(TransferError::malformed_response("bad")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::MalformedResponse);
        assert!(executor.error_for("K").is_some());
    }

    #[tokio::test]
    async fn later_success_clears_failure() {
        let executor = InMemoryImportExecutor::new();
        executor
            .execute_and_swallow("P1", "p", fail(TransferError::network("reset")))
            .await
            .unwrap();
        assert!(executor.error_for("P1").is_some());

        executor
            .execute_and_swallow("P1", "p", ok("/r/p"))
            .await
            .unwrap();
        assert!(executor.error_for("P1").is_none());
        assert!(executor.errors().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_runs_once_under_concurrency() {
        let executor = Arc::new(InMemoryImportExecutor::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let executor = executor.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                let producer: BoxFuture<'static, TransferResult<String>> = Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok("/r/folder/".to_string())
                });
                executor
                    .execute_and_swallow("F1", "folder", producer)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("/r/folder/"));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
