//! In-process cache store with per-entry expiry.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use cachet_core::{CacheKey, StoreError, StoreResult};

use super::{expires_at, is_live, now_millis, CacheStore};

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<i64>,
}

/// Thread-safe in-memory store.
///
/// Expired entries are invisible to reads and are dropped lazily when a
/// write touches them or [`InMemoryStore::purge_expired`] runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<CacheKey, StoredValue>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns true if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry.
    pub fn clear(&self) -> StoreResult<()> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = now_millis();
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, v| is_live(v.expires_at, now));
        Ok(before - entries.len())
    }
}

fn poisoned<E>(_: E) -> StoreError {
    StoreError::transport("in-memory store lock poisoned")
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        let now = now_millis();
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .get(key)
            .filter(|v| is_live(v.expires_at, now))
            .map(|v| v.bytes.clone()))
    }

    async fn get_bulk(&self, keys: &[CacheKey]) -> StoreResult<HashMap<CacheKey, Vec<u8>>> {
        let now = now_millis();
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                entries
                    .get(key)
                    .filter(|v| is_live(v.expires_at, now))
                    .map(|v| (key.clone(), v.bytes.clone()))
            })
            .collect())
    }

    async fn set(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<()> {
        let now = now_millis();
        self.entries.write().map_err(poisoned)?.insert(
            key.clone(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: expires_at(ttl_seconds, now),
            },
        );
        Ok(())
    }

    async fn add(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<bool> {
        let now = now_millis();
        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries
            .get(key)
            .is_some_and(|existing| is_live(existing.expires_at, now))
        {
            return Ok(false);
        }
        entries.insert(
            key.clone(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: expires_at(ttl_seconds, now),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<bool> {
        let now = now_millis();
        Ok(self
            .entries
            .write()
            .map_err(poisoned)?
            .remove(key)
            .is_some_and(|v| is_live(v.expires_at, now)))
    }
}
