//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a local,
//! memory-mapped key-value store that survives process restarts.
//!
//! # Value Layout
//!
//! Every value is stored as `[expires_at_ms: i64 LE][payload]`, where an
//! expiry of 0 means "never". Expired entries read as absent. They are
//! reclaimed by the next write to the same key, or in bulk by
//! [`LmdbStore::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get` and `get_bulk`
//! - Write transactions for `set`, `add` and `delete`

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use cachet_core::{CacheKey, StoreError, StoreResult};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};

use super::{expires_at, is_live, now_millis, CacheStore};

const HEADER_LEN: usize = 8;

/// Error type for opening an LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::transport(e)
    }
}

fn txn_error(e: heed::Error) -> StoreError {
    StoreError::from(LmdbStoreError::Transaction(e.to_string()))
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use cachet_storage::store::{CacheStore, LmdbStore};
///
/// let store = LmdbStore::open("/tmp/cachet", 100)?;
/// store.set(&key, 3600, b"payload").await?;
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) a store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> StoreResult<u64> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.db.len(&rtxn).map_err(txn_error)
    }

    /// Returns true if the store holds nothing.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read_live(&self, rtxn: &RoTxn<'_>, key: &CacheKey, now: i64) -> StoreResult<Option<Vec<u8>>> {
        let Some(raw) = self.db.get(rtxn, key.as_str().as_bytes()).map_err(txn_error)? else {
            return Ok(None);
        };
        match decode_value(raw) {
            Some((expiry, payload)) if is_live(expiry, now) => Ok(Some(payload.to_vec())),
            Some(_) => Ok(None),
            None => {
                tracing::warn!(key = %key, "Discarding LMDB entry with truncated header");
                Ok(None)
            }
        }
    }

    /// Remove every expired entry in one write transaction. Returns how
    /// many were removed.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = now_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let mut dead = Vec::new();
        for result in self.db.iter(&wtxn).map_err(txn_error)? {
            let (raw_key, raw_value) = result.map_err(txn_error)?;
            let live = decode_value(raw_value).is_some_and(|(expiry, _)| is_live(expiry, now));
            if !live {
                dead.push(raw_key.to_vec());
            }
        }

        for raw_key in &dead {
            self.db.delete(&mut wtxn, raw_key).map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;

        if !dead.is_empty() {
            tracing::debug!(removed = dead.len(), "Purged expired LMDB entries");
        }
        Ok(dead.len())
    }

    /// Delete `key`, reporting true only if it held a live entry.
    fn remove(&self, wtxn: &mut RwTxn<'_>, key: &CacheKey, now: i64) -> StoreResult<bool> {
        let live = self
            .db
            .get(wtxn, key.as_str().as_bytes())
            .map_err(txn_error)?
            .and_then(decode_value)
            .is_some_and(|(expiry, _)| is_live(expiry, now));
        let existed = self
            .db
            .delete(wtxn, key.as_str().as_bytes())
            .map_err(txn_error)?;
        Ok(existed && live)
    }

    fn put(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8], only_if_absent: bool) -> StoreResult<bool> {
        let now = now_millis();
        let encoded = encode_value(expires_at(ttl_seconds, now), value);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        if only_if_absent {
            let occupied = self
                .db
                .get(&wtxn, key.as_str().as_bytes())
                .map_err(txn_error)?
                .and_then(decode_value)
                .is_some_and(|(expiry, _)| is_live(expiry, now));
            if occupied {
                return Ok(false);
            }
        }

        self.db
            .put(&mut wtxn, key.as_str().as_bytes(), &encoded)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(true)
    }
}

fn encode_value(expires_at: Option<i64>, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&expires_at.unwrap_or(0).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn decode_value(bytes: &[u8]) -> Option<(Option<i64>, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let header: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().ok()?;
    let expiry = match i64::from_le_bytes(header) {
        0 => None,
        millis => Some(millis),
    };
    Some((expiry, &bytes[HEADER_LEN..]))
}

#[async_trait]
impl CacheStore for LmdbStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.read_live(&rtxn, key, now_millis())
    }

    async fn get_bulk(&self, keys: &[CacheKey]) -> StoreResult<HashMap<CacheKey, Vec<u8>>> {
        let now = now_millis();
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.read_live(&rtxn, key, now)? {
                found.insert(key.clone(), bytes);
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<()> {
        self.put(key, ttl_seconds, value, false).map(|_| ())
    }

    async fn add(&self, key: &CacheKey, ttl_seconds: u32, value: &[u8]) -> StoreResult<bool> {
        self.put(key, ttl_seconds, value, true)
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<bool> {
        let now = now_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.remove(&mut wtxn, key, now)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        let now = now_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.remove(&mut wtxn, key, now)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }
}
