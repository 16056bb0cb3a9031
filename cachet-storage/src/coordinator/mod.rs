//! Read-through, write-through and invalidation coordinators.
//!
//! The coordinators wrap an arbitrary data-source call with caching:
//!
//! - [`BatchCacheCoordinator`] reconciles many keys at once: one bulk fetch,
//!   one call to the data source for exactly the missed subset, and ordered
//!   output that mirrors the caller's input.
//! - [`SingleKeyCoordinator`] does the same for a single key.
//!
//! # Failure Semantics
//!
//! - Store failures on reads degrade to "miss everything" and are logged.
//! - Store failures on writes and deletes are logged and ignored.
//! - Data-source errors propagate unchanged.
//! - Configuration and reconciliation errors are returned, never guessed
//!   around.
//!
//! Concurrent calls for the same missed key are not coalesced: each one
//! invokes the data source and writes its result (last write wins).

pub mod batch;
pub mod single;
pub(crate) mod state;
pub mod stats;

use std::sync::Arc;

use cachet_core::{
    CacheEntry, CacheKey, CacheKeyBuilder, Cacheable, CachetConfig, CachetResult, Codec,
    ConfigError, IdentityRegistry, JsonCodec, WriteBack,
};
use serde::Serialize;

use crate::store::CacheStore;

pub use batch::BatchCacheCoordinator;
pub use single::SingleKeyCoordinator;
pub use stats::{CacheStats, CoordinatorStats};

/// How a pending write reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    /// Overwrite.
    Set,
    /// Only if absent (used for null sentinels on the read path).
    Add,
}

/// A best-effort write collected during reconciliation.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub(crate) key: CacheKey,
    pub(crate) bytes: Vec<u8>,
    pub(crate) kind: WriteKind,
}

/// Everything the coordinators share: the store, the codec, key building,
/// process configuration and statistics.
pub struct CoordinatorContext<S: ?Sized, C = JsonCodec> {
    store: Arc<S>,
    codec: C,
    keys: CacheKeyBuilder,
    config: CachetConfig,
    stats: Arc<CoordinatorStats>,
}

impl<S> CoordinatorContext<S, JsonCodec>
where
    S: CacheStore + ?Sized + 'static,
{
    /// Create a context using the JSON codec and the global identity registry.
    pub fn new(store: Arc<S>, config: CachetConfig) -> Self {
        let keys = CacheKeyBuilder::new(IdentityRegistry::global())
            .with_max_key_length(config.max_key_length);
        Self {
            store,
            codec: JsonCodec,
            keys,
            config,
            stats: Arc::new(CoordinatorStats::default()),
        }
    }
}

impl<S, C> CoordinatorContext<S, C>
where
    S: CacheStore + ?Sized + 'static,
    C: Codec,
{
    /// Swap the codec.
    pub fn with_codec<C2: Codec>(self, codec: C2) -> CoordinatorContext<S, C2> {
        CoordinatorContext {
            store: self.store,
            codec,
            keys: self.keys,
            config: self.config,
            stats: self.stats,
        }
    }

    /// Use an injected identity registry instead of the global one.
    pub fn with_registry(mut self, registry: Arc<IdentityRegistry>) -> Self {
        self.keys = CacheKeyBuilder::new(registry).with_max_key_length(self.config.max_key_length);
        self
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the key builder.
    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    /// Get the process configuration.
    pub fn config(&self) -> &CachetConfig {
        &self.config
    }

    /// Snapshot the statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub(crate) fn encode<T: Serialize>(&self, key: &CacheKey, value: Option<&T>) -> Option<Vec<u8>> {
        match self.codec.encode_option(value) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Skipping cache write for unencodable value");
                self.stats.record_write_failure();
                None
            }
        }
    }

    pub(crate) fn decode<T: Cacheable>(&self, key: &CacheKey, bytes: &[u8]) -> Option<CacheEntry<T>> {
        match self.codec.decode(bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Treating undecodable cache entry as a miss");
                None
            }
        }
    }

    /// Fail fast when keys must come from returned values of type `T` but
    /// no identity function is registered for it.
    pub(crate) fn require_result_identity<T: 'static>(&self) -> CachetResult<()> {
        if self.keys.registry().is_registered::<T>() {
            Ok(())
        } else {
            Err(ConfigError::MissingRequired {
                field: format!("identity function for {}", std::any::type_name::<T>()),
            }
            .into())
        }
    }

    /// Apply best-effort writes. Never fails.
    pub(crate) async fn write_back(&self, writes: Vec<PendingWrite>, ttl_seconds: u32, mode: WriteBack) {
        if writes.is_empty() {
            return;
        }
        match (mode, tokio::runtime::Handle::try_current()) {
            (WriteBack::Detached, Ok(handle)) => {
                let store = Arc::clone(&self.store);
                let stats = Arc::clone(&self.stats);
                handle.spawn(async move {
                    apply_writes(&*store, writes, ttl_seconds, &stats).await;
                });
            }
            (WriteBack::Detached, Err(_)) => {
                tracing::debug!("No async runtime for detached write-back; writing inline");
                apply_writes(&*self.store, writes, ttl_seconds, &self.stats).await;
            }
            (WriteBack::Inline, _) => {
                apply_writes(&*self.store, writes, ttl_seconds, &self.stats).await;
            }
        }
    }

    /// Delete keys one at a time so one failure does not block the rest.
    /// Returns how many keys were actually removed.
    pub(crate) async fn delete_silently(&self, keys: &[CacheKey]) -> u64 {
        let mut removed = 0;
        for key in keys {
            match self.store.delete(key).await {
                Ok(true) => {
                    removed += 1;
                    self.stats.record_invalidation();
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Cache delete failed");
                    self.stats.record_write_failure();
                }
            }
        }
        removed
    }

    pub(crate) fn record_hits(&self, n: usize) {
        self.stats.record_hits(n as u64);
    }

    pub(crate) fn record_misses(&self, n: usize) {
        self.stats.record_misses(n as u64);
    }

    pub(crate) fn record_store_error(&self) {
        self.stats.record_store_error();
    }
}

impl<S: ?Sized, C: Clone> Clone for CoordinatorContext<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
            keys: self.keys.clone(),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

async fn apply_writes<S>(store: &S, writes: Vec<PendingWrite>, ttl_seconds: u32, stats: &CoordinatorStats)
where
    S: CacheStore + ?Sized,
{
    for write in writes {
        let stored = match write.kind {
            WriteKind::Set => store.set_silently(&write.key, ttl_seconds, &write.bytes).await,
            WriteKind::Add => match store.add(&write.key, ttl_seconds, &write.bytes).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(key = %write.key, error = %e, "Cache add failed");
                    false
                }
            },
        };
        if stored {
            stats.record_write();
        } else {
            stats.record_write_failure();
        }
    }
}
