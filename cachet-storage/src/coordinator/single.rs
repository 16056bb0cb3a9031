//! Single-key read-through, write-through and invalidation.

use std::future::Future;

use cachet_core::{
    CacheKey, CacheOptions, Cacheable, CachetError, CachetResult, Codec, ConfigError,
    InvalidateTiming, KeyObject,
};

use super::{CacheStats, CoordinatorContext, PendingWrite, WriteKind};
use crate::store::CacheStore;

/// Coordinates caching around a data source that produces one value.
///
/// A null result is always persisted as the sentinel: set-if-absent on the
/// read path (overwrite when the stored bytes were bypassed or undecodable),
/// overwrite on the write path.
pub struct SingleKeyCoordinator<S: ?Sized, C = cachet_core::JsonCodec> {
    ctx: CoordinatorContext<S, C>,
}

impl<S, C> SingleKeyCoordinator<S, C>
where
    S: CacheStore + ?Sized + 'static,
    C: Codec,
{
    /// Create a coordinator over a shared context.
    pub fn new(ctx: CoordinatorContext<S, C>) -> Self {
        Self { ctx }
    }

    /// Get the shared context.
    pub fn context(&self) -> &CoordinatorContext<S, C> {
        &self.ctx
    }

    /// Snapshot the statistics.
    pub fn stats(&self) -> CacheStats {
        self.ctx.stats()
    }

    /// Return the cached value for `key_object`, or compute and cache it.
    ///
    /// Keys derived from results make no sense before the result exists, so
    /// `generate_keys_from_result` is rejected here.
    pub async fn read_through<K, T, F, Fut, E>(
        &self,
        key_object: &K,
        options: &CacheOptions,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        K: KeyObject,
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<CachetError>,
    {
        if self.ctx.config().disabled {
            return compute().await;
        }
        options.validate()?;
        if options.generate_keys_from_result {
            return Err(CachetError::from(ConfigError::IncompatibleOptions {
                option_a: "generate_keys_from_result".to_string(),
                option_b: "single-key read_through".to_string(),
            })
            .into());
        }

        let key = self.ctx.keys().key_for(&options.namespace, key_object)?;

        // Stale bytes under the key must be overwritten even by a sentinel.
        let mut stale = options.read_directly_from_store;
        if !options.read_directly_from_store {
            match self.ctx.store().get(&key).await {
                Ok(Some(bytes)) => match self.ctx.decode::<T>(&key, &bytes) {
                    Some(entry) => {
                        tracing::debug!(key = %key, null = entry.is_null(), "Cache hit");
                        self.ctx.record_hits(1);
                        return Ok(entry.into_option());
                    }
                    None => stale = true,
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Cache get failed; computing instead");
                    self.ctx.record_store_error();
                }
            }
        }

        self.ctx.record_misses(1);
        let value = compute().await?;
        let kind = if value.is_some() || stale {
            WriteKind::Set
        } else {
            WriteKind::Add
        };
        self.store_value(key, value.as_ref(), kind, options).await;
        Ok(value)
    }

    /// Run the authoritative write, then cache its result under
    /// `key_object`. A null result overwrites with the sentinel.
    pub async fn write_through<K, T, F, Fut, E>(
        &self,
        key_object: &K,
        options: &CacheOptions,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        K: KeyObject,
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<CachetError>,
    {
        if self.ctx.config().disabled {
            return compute().await;
        }
        options.validate()?;
        let key = self.ctx.keys().key_for(&options.namespace, key_object)?;

        let value = compute().await?;
        self.store_value(key, value.as_ref(), WriteKind::Set, options)
            .await;
        Ok(value)
    }

    /// Run the authoritative write, then cache a non-null result under the
    /// key derived from the result itself.
    pub async fn write_through_by_result<T, F, Fut, E>(
        &self,
        options: &CacheOptions,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<CachetError>,
    {
        if self.ctx.config().disabled {
            return compute().await;
        }
        options.validate()?;
        self.ctx.require_result_identity::<T>()?;

        let value = compute().await?;
        if let Some(v) = value.as_ref() {
            let key = self.ctx.keys().key_for_result(&options.namespace, v)?;
            self.store_value(key, Some(v), WriteKind::Set, options).await;
        }
        Ok(value)
    }

    /// Delete the key for `key_object`. Returns true if something was
    /// removed; a failed delete is logged and reported as false.
    pub async fn invalidate<K: KeyObject>(
        &self,
        key_object: &K,
        options: &CacheOptions,
    ) -> CachetResult<bool> {
        if self.ctx.config().disabled {
            return Ok(false);
        }
        options.validate()?;
        let key = self.ctx.keys().key_for(&options.namespace, key_object)?;
        Ok(self.ctx.delete_silently(&[key]).await > 0)
    }

    /// Run `compute` and invalidate the key for `key_object` before or
    /// after it. With [`InvalidateTiming::After`], a failed computation
    /// leaves the cache untouched.
    pub async fn invalidate_around<K, R, F, Fut, E>(
        &self,
        key_object: &K,
        timing: InvalidateTiming,
        options: &CacheOptions,
        compute: F,
    ) -> Result<R, E>
    where
        K: KeyObject,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<CachetError>,
    {
        if self.ctx.config().disabled {
            return compute().await;
        }
        options.validate()?;
        let key = [self.ctx.keys().key_for(&options.namespace, key_object)?];

        match timing {
            InvalidateTiming::Before => {
                self.ctx.delete_silently(&key).await;
                compute().await
            }
            InvalidateTiming::After => {
                let result = compute().await?;
                self.ctx.delete_silently(&key).await;
                Ok(result)
            }
        }
    }

    /// Run `compute` and invalidate the key derived from its result, if any.
    pub async fn invalidate_by_result<T, F, Fut, E>(
        &self,
        options: &CacheOptions,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        T: 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<CachetError>,
    {
        if self.ctx.config().disabled {
            return compute().await;
        }
        options.validate()?;
        self.ctx.require_result_identity::<T>()?;

        let value = compute().await?;
        if let Some(v) = value.as_ref() {
            let key = self.ctx.keys().key_for_result(&options.namespace, v)?;
            self.ctx.delete_silently(&[key]).await;
        }
        Ok(value)
    }

    async fn store_value<T: Cacheable>(
        &self,
        key: CacheKey,
        value: Option<&T>,
        kind: WriteKind,
        options: &CacheOptions,
    ) {
        let Some(bytes) = self.ctx.encode(&key, value) else {
            return;
        };
        let ttl = options.ttl_or(self.ctx.config().default_ttl_seconds);
        self.ctx
            .write_back(vec![PendingWrite { key, bytes, kind }], ttl, options.write_back)
            .await;
    }
}
