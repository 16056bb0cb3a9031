//! Cachet Core - Keys, Identities, Sentinels and Options
//!
//! Pure types shared by every cachet crate. Nothing in here performs I/O
//! except [`CachetConfig::load`]; the store trait and the coordinators live
//! in `cachet-storage`.

pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod key;
pub mod options;
pub mod sentinel;

pub use codec::{Cacheable, Codec, JsonCodec};
pub use config::CachetConfig;
pub use error::{
    CachetError, CachetResult, CodecError, ConfigError, ReconciliationError, StoreError,
    StoreResult,
};
pub use identity::{IdentityRegistry, KeyObject};
pub use key::{
    CacheKey, CacheKeyBuilder, CompositeKey, DEFAULT_MAX_KEY_LENGTH, ID_SEPARATOR,
    NAMESPACE_SEPARATOR,
};
pub use options::{CacheOptions, InvalidateTiming, WriteBack};
pub use sentinel::{CacheEntry, NullSentinel};
