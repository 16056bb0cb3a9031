//! Deadline wrapper for any cache store.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{CacheKey, StoreError, StoreResult};

use super::CacheStore;

/// Applies a fixed deadline to every operation of the inner store.
///
/// An operation that exceeds the deadline fails with
/// [`StoreError::Timeout`], which the coordinators treat like any other
/// store failure.
#[derive(Debug, Clone)]
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutStore<S> {
    /// Wrap `inner` with a per-operation deadline.
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The per-operation deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl<S: CacheStore> CacheStore for TimeoutStore<S> {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn get_bulk(&self, keys: &[CacheKey]) -> StoreResult<HashMap<CacheKey, Vec<u8>>> {
        self.bounded("get_bulk", self.inner.get_bulk(keys)).await
    }

    async fn set(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<()> {
        self.bounded("set", self.inner.set(key, ttl_seconds, value))
            .await
    }

    async fn add(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<bool> {
        self.bounded("add", self.inner.add(key, ttl_seconds, value))
            .await
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<bool> {
        self.bounded("delete", self.inner.delete(key)).await
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        self.bounded("delete_many", self.inner.delete_many(keys))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    /// Store whose reads never complete.
    struct StalledStore;

    #[async_trait]
    impl CacheStore for StalledStore {
        async fn get(&self, _key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
            std::future::pending().await
        }

        async fn set(&self, _key: &CacheKey, _ttl: u32, _value: &[u8]) -> StoreResult<()> {
            Ok(())
        }

        async fn add(&self, _key: &CacheKey, _ttl: u32, _value: &[u8]) -> StoreResult<bool> {
            Ok(true)
        }

        async fn delete(&self, _key: &CacheKey) -> StoreResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_operation_times_out() {
        let store = TimeoutStore::new(StalledStore, Duration::from_millis(50));
        let key = CacheKey::build("ns", &["1"]).unwrap();

        let err = store.get(&key).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Timeout {
                operation: "get",
                timeout: Duration::from_millis(50),
            }
        );

        let err = store.get_bulk(&[key.clone()]).await.unwrap_err();
        assert!(err.is_timeout());

        assert!(store.set(&key, 0, b"x").await.is_ok());
    }

    #[tokio::test]
    async fn test_fast_operations_pass_through() {
        let store = TimeoutStore::new(InMemoryStore::new(), Duration::from_secs(1));
        let key = CacheKey::build("ns", &["1"]).unwrap();

        store.set(&key, 0, b"v").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"v".to_vec()));
        assert!(store.inner().len() == 1);
        assert_eq!(store.timeout(), Duration::from_secs(1));
    }
}
