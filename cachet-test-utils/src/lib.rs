//! Cachet Test Utilities
//!
//! Centralized test infrastructure for the cachet workspace:
//! - A recording store with failure injection
//! - Log capture for asserting on emitted warnings
//! - Proptest generators for keys and options
//! - Test fixtures for common coordinator setups

pub use cachet_core::{
    CacheEntry, CacheKey, CacheOptions, CachetConfig, CachetError, CachetResult, ConfigError,
    IdentityRegistry, InvalidateTiming, NullSentinel, ReconciliationError, StoreError,
    StoreResult, WriteBack,
};
pub use cachet_storage::{
    BatchCacheCoordinator, CacheStore, CoordinatorContext, InMemoryStore, SingleKeyCoordinator,
};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

// ============================================================================
// RECORDING STORE
// ============================================================================

/// One call observed by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get(String),
    GetBulk(Vec<String>),
    Set { key: String, ttl_seconds: u32 },
    Add { key: String, ttl_seconds: u32 },
    Delete(String),
}

impl StoreCall {
    /// Returns true for `Set` and `Add`.
    pub fn is_write(&self) -> bool {
        matches!(self, StoreCall::Set { .. } | StoreCall::Add { .. })
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    reads: bool,
    writes: bool,
    deletes: HashSet<String>,
}

/// In-memory store that records every call and can be told to fail.
///
/// Failed calls are still recorded, and never reach the backing store.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: InMemoryStore,
    calls: Mutex<Vec<StoreCall>>,
    failures: Mutex<FailurePlan>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing store. Calls made on it directly are not recorded.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Put bytes in the backing store without recording a call.
    pub async fn seed(&self, key: &CacheKey, value: &[u8]) {
        let _ = self.inner.set(key, 0, value).await;
    }

    /// Read bytes from the backing store without recording a call.
    pub async fn peek(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.inner.get(key).await.ok().flatten()
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Only the `Set` and `Add` calls.
    pub fn writes(&self) -> Vec<StoreCall> {
        lock(&self.calls).iter().filter(|c| c.is_write()).cloned().collect()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Make `get` and `get_bulk` fail with a transport error.
    pub fn fail_reads(&self, enabled: bool) {
        lock(&self.failures).reads = enabled;
    }

    /// Make `set` and `add` fail with a transport error.
    pub fn fail_writes(&self, enabled: bool) {
        lock(&self.failures).writes = enabled;
    }

    /// Make `delete` fail for one key.
    pub fn fail_delete(&self, key: &CacheKey) {
        lock(&self.failures).deletes.insert(key.as_str().to_string());
    }

    fn record(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }

    fn injected(operation: &str) -> StoreError {
        StoreError::transport(format!("injected {} failure", operation))
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        self.record(StoreCall::Get(key.as_str().to_string()));
        if lock(&self.failures).reads {
            return Err(Self::injected("get"));
        }
        self.inner.get(key).await
    }

    async fn get_bulk(&self, keys: &[CacheKey]) -> StoreResult<HashMap<CacheKey, Vec<u8>>> {
        self.record(StoreCall::GetBulk(
            keys.iter().map(|k| k.as_str().to_string()).collect(),
        ));
        if lock(&self.failures).reads {
            return Err(Self::injected("get_bulk"));
        }
        self.inner.get_bulk(keys).await
    }

    async fn set(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<()> {
        self.record(StoreCall::Set {
            key: key.as_str().to_string(),
            ttl_seconds,
        });
        if lock(&self.failures).writes {
            return Err(Self::injected("set"));
        }
        self.inner.set(key, ttl_seconds, value).await
    }

    async fn add(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<bool> {
        self.record(StoreCall::Add {
            key: key.as_str().to_string(),
            ttl_seconds,
        });
        if lock(&self.failures).writes {
            return Err(Self::injected("add"));
        }
        self.inner.add(key, ttl_seconds, value).await
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<bool> {
        self.record(StoreCall::Delete(key.as_str().to_string()));
        if lock(&self.failures).deletes.contains(key.as_str()) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// LOG CAPTURE
// ============================================================================

pub mod logs {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// One captured event.
    #[derive(Debug, Clone)]
    pub struct CapturedEvent {
        pub level: Level,
        pub message: String,
        pub fields: Vec<(String, String)>,
    }

    /// Layer that keeps every event it sees.
    #[derive(Debug, Clone, Default)]
    pub struct CapturedLogs {
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    impl CapturedLogs {
        /// All captured events.
        pub fn events(&self) -> Vec<CapturedEvent> {
            super::lock(&self.events).clone()
        }

        /// Messages of captured `WARN` events.
        pub fn warnings(&self) -> Vec<String> {
            self.messages_at(Level::WARN)
        }

        /// Messages captured at `level`.
        pub fn messages_at(&self, level: Level) -> Vec<String> {
            super::lock(&self.events)
                .iter()
                .filter(|e| e.level == level)
                .map(|e| e.message.clone())
                .collect()
        }
    }

    impl<S: Subscriber> Layer<S> for CapturedLogs {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = EventVisitor::default();
            event.record(&mut visitor);
            super::lock(&self.events).push(CapturedEvent {
                level: *event.metadata().level(),
                message: visitor.message,
                fields: visitor.fields,
            });
        }
    }

    #[derive(Default)]
    struct EventVisitor {
        message: String,
        fields: Vec<(String, String)>,
    }

    impl Visit for EventVisitor {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "message" {
                self.message = value.to_string();
            } else {
                self.fields.push((field.name().to_string(), value.to_string()));
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{:?}", value);
            } else {
                self.fields.push((field.name().to_string(), format!("{:?}", value)));
            }
        }
    }

    /// Capture events on the current thread until the guard drops.
    ///
    /// Use with a current-thread runtime (the `#[tokio::test]` default).
    pub fn capture() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::registry().with(logs.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate a valid namespace.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Generate a valid identity component.
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_.-]{1,24}"
    }

    /// Generate a list of identity components for a compound key.
    pub fn arb_ids() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_id(), 1..5)
    }

    /// Generate batch input drawn from a small domain so duplicates are
    /// common.
    pub fn arb_key_objects(max_len: usize) -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(0u32..16, 0..max_len)
    }

    /// Generate the subset of a small domain that is already cached.
    pub fn arb_cached_subset() -> impl Strategy<Value = HashSet<u32>> {
        prop::collection::hash_set(0u32..16, 0..16)
    }

    /// Generate options with every flag that keeps positional
    /// reconciliation.
    pub fn arb_options() -> impl Strategy<Value = CacheOptions> {
        (
            arb_namespace(),
            prop::option::of(1u32..86_400),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(namespace, ttl, add_nulls, skip_nulls)| {
                let mut options = CacheOptions::new(namespace)
                    .with_add_nulls_to_cache(add_nulls)
                    .with_skip_nulls_in_result(skip_nulls);
                if let Some(ttl) = ttl {
                    options = options.with_ttl(ttl);
                }
                options
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// A coordinator context over `store` with a private identity registry.
    pub fn context<S: CacheStore + ?Sized + 'static>(
        store: Arc<S>,
        config: CachetConfig,
    ) -> CoordinatorContext<S> {
        CoordinatorContext::new(store, config).with_registry(Arc::new(IdentityRegistry::new()))
    }

    /// A batch coordinator over a fresh recording store.
    pub fn batch() -> (BatchCacheCoordinator<RecordingStore>, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::new());
        let coordinator =
            BatchCacheCoordinator::new(context(Arc::clone(&store), CachetConfig::default()));
        (coordinator, store)
    }

    /// A single-key coordinator over a fresh recording store.
    pub fn single() -> (SingleKeyCoordinator<RecordingStore>, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::new());
        let coordinator =
            SingleKeyCoordinator::new(context(Arc::clone(&store), CachetConfig::default()));
        (coordinator, store)
    }

    /// Build a key, panicking on invalid input.
    pub fn key(namespace: &str, id: impl ToString) -> CacheKey {
        match CacheKey::build(namespace, &[id.to_string()]) {
            Ok(key) => key,
            Err(e) => panic!("invalid fixture key {}:{}", namespace, e),
        }
    }

    /// JSON bytes for a value, as the default codec stores it.
    pub fn json<T: serde::Serialize>(value: &T) -> Vec<u8> {
        match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => panic!("fixture value does not serialize: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_store_logs_and_fails() {
        let store = RecordingStore::new();
        let key = fixtures::key("ns", 1);

        store.set(&key, 10, b"v").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"v".to_vec()));

        store.fail_reads(true);
        assert!(store.get(&key).await.is_err());
        assert!(store.get_bulk(&[key.clone()]).await.is_err());

        store.fail_delete(&key);
        assert!(store.delete(&key).await.is_err());
        assert_eq!(store.peek(&key).await, Some(b"v".to_vec()));

        assert_eq!(
            store.writes(),
            vec![StoreCall::Set {
                key: "ns:1".to_string(),
                ttl_seconds: 10,
            }]
        );
        assert_eq!(store.calls().len(), 5);
    }

    #[test]
    fn test_log_capture() {
        let (logs, _guard) = logs::capture();
        tracing::warn!(key = "ns:1", "Something degraded");
        tracing::debug!("Not a warning");

        assert_eq!(logs.warnings(), vec!["Something degraded".to_string()]);
        let event = &logs.events()[0];
        assert!(event.fields.iter().any(|(name, value)| name == "key" && value == "ns:1"));
    }
}
