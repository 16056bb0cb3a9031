//! Cache store abstraction.
//!
//! The coordinators never talk to a particular cache server; they consume
//! this byte-oriented trait. Encoding is the coordinator's job, expiry and
//! eviction are the store's.

pub mod lmdb;
pub mod memory;
pub mod timeout;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::{CacheKey, StoreResult};

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::InMemoryStore;
pub use timeout::TimeoutStore;

/// Key/value cache store consumed by the coordinators.
///
/// Implementations must be safe for concurrent use: one store is shared by
/// every in-flight coordinator call.
///
/// # Errors
///
/// A key that is not present is not an error. `get` returns `Ok(None)` and
/// `get_bulk` simply leaves the key out of the map. Errors are reserved for
/// timeouts and transport failures.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the raw bytes stored under `key`.
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>>;

    /// Get many keys in one round-trip.
    ///
    /// The default implementation issues one `get` per key; stores with a
    /// native multi-get should override it.
    async fn get_bulk(&self, keys: &[CacheKey]) -> StoreResult<HashMap<CacheKey, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.get(key).await? {
                found.insert(key.clone(), bytes);
            }
        }
        Ok(found)
    }

    /// Store `value` under `key`, overwriting. A TTL of 0 never expires.
    async fn set(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<()>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn add(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<bool>;

    /// Delete `key`. Returns whether something was removed.
    async fn delete(&self, key: &CacheKey) -> StoreResult<bool>;

    /// Delete many keys, returning how many were removed.
    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// `set` that logs and swallows failures. Returns whether it succeeded.
    async fn set_silently(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> bool {
        match self.set(key, ttl_seconds, value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache set failed");
                false
            }
        }
    }
}

#[async_trait]
impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn get_bulk(&self, keys: &[CacheKey]) -> StoreResult<HashMap<CacheKey, Vec<u8>>> {
        (**self).get_bulk(keys).await
    }

    async fn set(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<()> {
        (**self).set(key, ttl_seconds, value).await
    }

    async fn add(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<bool> {
        (**self).add(key, ttl_seconds, value).await
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<bool> {
        (**self).delete(key).await
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        (**self).delete_many(keys).await
    }
}

/// Absolute expiry (ms since epoch) for a TTL, or `None` for "never".
pub(crate) fn expires_at(ttl_seconds: u32, now_millis: i64) -> Option<i64> {
    if ttl_seconds == 0 {
        None
    } else {
        Some(now_millis.saturating_add(i64::from(ttl_seconds) * 1000))
    }
}

/// Whether an entry with the given expiry is still readable at `now_millis`.
pub(crate) fn is_live(expires_at: Option<i64>, now_millis: i64) -> bool {
    match expires_at {
        None => true,
        Some(deadline) => now_millis < deadline,
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ttl_never_expires() {
        assert_eq!(expires_at(0, 1_000), None);
        assert!(is_live(None, i64::MAX));
    }

    #[test]
    fn test_ttl_expiry_boundary() {
        let deadline = expires_at(2, 10_000);
        assert_eq!(deadline, Some(12_000));
        assert!(is_live(deadline, 11_999));
        assert!(!is_live(deadline, 12_000));
    }

    #[tokio::test]
    async fn test_arc_store_delegates() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        let key = CacheKey::build("ns", &["1"]).unwrap();

        store.set(&key, 0, b"v").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"v".to_vec()));
        assert!(store.set_silently(&key, 0, b"w").await);
        assert_eq!(store.delete_many(&[key.clone()]).await.unwrap(), 1);
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}
