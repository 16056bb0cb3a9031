//! Cachet Storage - Cache Stores and Coordinators
//!
//! Defines the byte-oriented [`CacheStore`] abstraction, the stores that
//! implement it, and the coordinators that wrap data-source calls with
//! read-through, write-through and invalidation.
//!
//! ```ignore
//! use std::sync::Arc;
//! use cachet_core::{CacheOptions, CachetConfig};
//! use cachet_storage::{BatchCacheCoordinator, CoordinatorContext, InMemoryStore, TimeoutStore};
//!
//! let config = CachetConfig::default();
//! let store = Arc::new(TimeoutStore::new(InMemoryStore::new(), config.store_timeout()));
//! let users = BatchCacheCoordinator::new(CoordinatorContext::new(store, config));
//! ```

pub mod coordinator;
pub mod store;

pub use coordinator::{
    BatchCacheCoordinator, CacheStats, CoordinatorContext, CoordinatorStats, SingleKeyCoordinator,
};
pub use store::{CacheStore, InMemoryStore, LmdbStore, LmdbStoreError, TimeoutStore};
