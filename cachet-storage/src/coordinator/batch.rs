//! Multi-key read-through, write-through and invalidation.

use std::collections::HashSet;
use std::future::Future;

use cachet_core::{
    CacheEntry, CacheKey, CacheOptions, Cacheable, CachetError, CachetResult, Codec,
    InvalidateTiming, KeyObject, ReconciliationError,
};

use super::state::BatchState;
use super::{CacheStats, CoordinatorContext, PendingWrite, WriteKind};
use crate::store::CacheStore;

/// Coordinates caching around a data source that takes and returns lists.
///
/// # Example
///
/// ```ignore
/// let coordinator = BatchCacheCoordinator::new(CoordinatorContext::new(store, config));
/// let options = CacheOptions::new("users").with_ttl(300);
///
/// // Only the ids that missed the cache reach the database.
/// let users = coordinator
///     .read_through(&ids, &options, |missed| async move { db.load_users(&missed).await })
///     .await?;
/// ```
pub struct BatchCacheCoordinator<S: ?Sized, C = cachet_core::JsonCodec> {
    ctx: CoordinatorContext<S, C>,
}

impl<S, C> BatchCacheCoordinator<S, C>
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

    /// Fetch-or-compute for a list of key objects.
    ///
    /// Issues one bulk fetch for the distinct keys, calls `compute` once with
    /// the missed objects (first-seen order, duplicates removed), writes the
    /// fresh values back best-effort, and returns one element per input
    /// object in input order. `compute` must return exactly one value per
    /// missed object, positionally aligned, unless keys are generated from
    /// results.
    pub async fn read_through<K, T, F, Fut, E>(
        &self,
        objects: &[K],
        options: &CacheOptions,
        compute: F,
    ) -> Result<Vec<Option<T>>, E>
    where
        K: KeyObject,
        T: Cacheable,
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<Vec<Option<T>>, E>>,
        E: From<CachetError>,
    {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        if self.ctx.config().disabled {
            return compute(objects.to_vec()).await;
        }

        options.validate()?;
        if options.generate_keys_from_result {
            self.ctx.require_result_identity::<T>()?;
        }

        let mut state: BatchState<'_, K, T> =
            BatchState::build(objects, &options.namespace, self.ctx.keys())?;

        if options.read_directly_from_store {
            tracing::debug!(namespace = %options.namespace, "Bypassing cache read");
        } else {
            self.fetch_into(&mut state, &options.namespace).await;
        }

        let missed = state.missed();
        self.ctx.record_hits(state.distinct_keys().len() - missed.len());
        self.ctx.record_misses(missed.len());

        if missed.is_empty() {
            return Ok(state.assemble(options.skip_nulls_in_result)?);
        }

        let missed_objects: Vec<K> = missed.iter().map(|(_, object)| (*object).clone()).collect();
        let results = compute(missed_objects).await?;

        let writes = if options.generate_keys_from_result {
            self.reconcile_by_result(&mut state, &missed, results, options)?
        } else {
            self.reconcile_positional(&mut state, &missed, results, options)?
        };

        let ttl = options.ttl_or(self.ctx.config().default_ttl_seconds);
        self.ctx.write_back(writes, ttl, options.write_back).await;

        Ok(state.assemble(options.skip_nulls_in_result)?)
    }

    /// Cache the values produced by an authoritative write.
    ///
    /// `compute` runs first; its result must align positionally with
    /// `objects`. Every key is then written (nulls only when
    /// `add_nulls_to_cache` is set), and the result is returned unchanged.
    pub async fn write_through<K, T, F, Fut, E>(
        &self,
        objects: &[K],
        options: &CacheOptions,
        compute: F,
    ) -> Result<Vec<Option<T>>, E>
    where
        K: KeyObject,
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Option<T>>, E>>,
        E: From<CachetError>,
    {
        if self.ctx.config().disabled {
            return compute().await;
        }
        options.validate()?;
        let keys = self.keys_for(objects, &options.namespace)?;

        let results = compute().await?;
        if results.len() != keys.len() {
            return Err(CachetError::from(ReconciliationError::LengthMismatch {
                expected: keys.len(),
                got: results.len(),
            })
            .into());
        }

        let mut written = HashSet::with_capacity(keys.len());
        let mut writes = Vec::with_capacity(keys.len());
        for (key, value) in keys.into_iter().zip(results.iter()) {
            if !written.insert(key.clone()) {
                continue;
            }
            if value.is_none() && !options.add_nulls_to_cache {
                tracing::debug!(key = %key, "Not caching null result");
                continue;
            }
            if let Some(bytes) = self.ctx.encode(&key, value.as_ref()) {
                writes.push(PendingWrite {
                    key,
                    bytes,
                    kind: WriteKind::Set,
                });
            }
        }

        let ttl = options.ttl_or(self.ctx.config().default_ttl_seconds);
        self.ctx.write_back(writes, ttl, options.write_back).await;
        Ok(results)
    }

    /// Cache the values produced by an authoritative write, keyed by the
    /// values themselves. Null results carry no identity and are skipped.
    pub async fn write_through_by_result<T, F, Fut, E>(
        &self,
        options: &CacheOptions,
        compute: F,
    ) -> Result<Vec<Option<T>>, E>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Option<T>>, E>>,
        E: From<CachetError>,
    {
        if self.ctx.config().disabled {
            return compute().await;
        }
        options.validate()?;
        self.ctx.require_result_identity::<T>()?;

        let results = compute().await?;

        let mut written = HashSet::with_capacity(results.len());
        let mut writes = Vec::with_capacity(results.len());
        for value in results.iter().flatten() {
            let key = self.ctx.keys().key_for_result(&options.namespace, value)?;
            if !written.insert(key.clone()) {
                continue;
            }
            if let Some(bytes) = self.ctx.encode(&key, Some(value)) {
                writes.push(PendingWrite {
                    key,
                    bytes,
                    kind: WriteKind::Set,
                });
            }
        }

        let ttl = options.ttl_or(self.ctx.config().default_ttl_seconds);
        self.ctx.write_back(writes, ttl, options.write_back).await;
        Ok(results)
    }

    /// Delete the keys for `objects`. Individual delete failures are logged
    /// and skipped. Returns how many keys were removed.
    pub async fn invalidate<K>(&self, objects: &[K], options: &CacheOptions) -> CachetResult<u64>
    where
        K: KeyObject,
    {
        if self.ctx.config().disabled {
            return Ok(0);
        }
        options.validate()?;
        let keys = self.distinct(self.keys_for(objects, &options.namespace)?);
        Ok(self.ctx.delete_silently(&keys).await)
    }

    /// Run `compute` and invalidate the keys for `objects` before or after it.
    ///
    /// With [`InvalidateTiming::After`], nothing is deleted if `compute`
    /// fails.
    pub async fn invalidate_around<K, R, F, Fut, E>(
        &self,
        objects: &[K],
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
        let keys = self.distinct(self.keys_for(objects, &options.namespace)?);

        match timing {
            InvalidateTiming::Before => {
                self.ctx.delete_silently(&keys).await;
                compute().await
            }
            InvalidateTiming::After => {
                let result = compute().await?;
                self.ctx.delete_silently(&keys).await;
                Ok(result)
            }
        }
    }

    /// Run `compute` and invalidate the keys derived from its non-null
    /// results.
    pub async fn invalidate_by_result<T, F, Fut, E>(
        &self,
        options: &CacheOptions,
        compute: F,
    ) -> Result<Vec<Option<T>>, E>
    where
        T: 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Option<T>>, E>>,
        E: From<CachetError>,
    {
        if self.ctx.config().disabled {
            return compute().await;
        }
        options.validate()?;
        self.ctx.require_result_identity::<T>()?;

        let results = compute().await?;
        let keys = results
            .iter()
            .flatten()
            .map(|value| self.ctx.keys().key_for_result(&options.namespace, value))
            .collect::<CachetResult<Vec<_>>>()?;
        self.ctx.delete_silently(&self.distinct(keys)).await;
        Ok(results)
    }

    async fn fetch_into<K, T>(&self, state: &mut BatchState<'_, K, T>, namespace: &str)
    where
        K: KeyObject,
        T: Cacheable,
    {
        match self.ctx.store().get_bulk(state.distinct_keys()).await {
            Ok(found) => {
                for (key, bytes) in found {
                    if !state.owns_key(&key) {
                        continue;
                    }
                    match self.ctx.decode::<T>(&key, &bytes) {
                        Some(entry) => state.resolve(key, entry),
                        None => state.mark_unreadable(key),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    namespace = %namespace,
                    keys = state.distinct_keys().len(),
                    error = %e,
                    "Bulk get failed; treating every key as a miss"
                );
                self.ctx.record_store_error();
            }
        }
    }

    /// Align results with the missed objects by position.
    fn reconcile_positional<K, T>(
        &self,
        state: &mut BatchState<'_, K, T>,
        missed: &[(CacheKey, &K)],
        results: Vec<Option<T>>,
        options: &CacheOptions,
    ) -> CachetResult<Vec<PendingWrite>>
    where
        K: KeyObject,
        T: Cacheable,
    {
        if results.len() != missed.len() {
            return Err(ReconciliationError::LengthMismatch {
                expected: missed.len(),
                got: results.len(),
            }
            .into());
        }

        let mut writes = Vec::with_capacity(missed.len());
        for ((key, _), value) in missed.iter().zip(results) {
            match value {
                Some(value) => {
                    if let Some(bytes) = self.ctx.encode(key, Some(&value)) {
                        writes.push(PendingWrite {
                            key: key.clone(),
                            bytes,
                            kind: WriteKind::Set,
                        });
                    }
                    state.resolve(key.clone(), CacheEntry::Value(value));
                }
                None => {
                    if options.add_nulls_to_cache {
                        if let Some(bytes) = self.ctx.encode::<T>(key, None) {
                            writes.push(PendingWrite {
                                key: key.clone(),
                                bytes,
                                kind: null_write_kind(state, key, options),
                            });
                        }
                    }
                    state.resolve(key.clone(), CacheEntry::null());
                }
            }
        }
        Ok(writes)
    }

    /// Match results to missed objects by the identity each result carries.
    ///
    /// Results that match no missed object are still cached under their own
    /// key. Missed objects with no matching result resolve to null.
    fn reconcile_by_result<K, T>(
        &self,
        state: &mut BatchState<'_, K, T>,
        missed: &[(CacheKey, &K)],
        results: Vec<Option<T>>,
        options: &CacheOptions,
    ) -> CachetResult<Vec<PendingWrite>>
    where
        K: KeyObject,
        T: Cacheable,
    {
        let missed_keys: HashSet<&CacheKey> = missed.iter().map(|(key, _)| key).collect();
        let mut written = HashSet::with_capacity(results.len());
        let mut writes = Vec::with_capacity(results.len());

        for value in results.into_iter().flatten() {
            let key = self.ctx.keys().key_for_result(&options.namespace, &value)?;
            if !written.insert(key.clone()) {
                continue;
            }
            if let Some(bytes) = self.ctx.encode(&key, Some(&value)) {
                writes.push(PendingWrite {
                    key: key.clone(),
                    bytes,
                    kind: WriteKind::Set,
                });
            }
            if missed_keys.contains(&key) {
                state.resolve(key, CacheEntry::Value(value));
            } else {
                tracing::debug!(key = %key, "Result matches no missed object; cached only");
            }
        }

        for (key, _) in missed {
            if state.is_resolved(key) {
                continue;
            }
            if options.add_nulls_to_cache {
                if let Some(bytes) = self.ctx.encode::<T>(key, None) {
                    writes.push(PendingWrite {
                        key: key.clone(),
                        bytes,
                        kind: null_write_kind(state, key, options),
                    });
                }
            }
            state.resolve(key.clone(), CacheEntry::null());
        }
        Ok(writes)
    }

    fn keys_for<K: KeyObject>(&self, objects: &[K], namespace: &str) -> CachetResult<Vec<CacheKey>> {
        objects
            .iter()
            .map(|object| self.ctx.keys().key_for(namespace, object))
            .collect()
    }

    fn distinct(&self, keys: Vec<CacheKey>) -> Vec<CacheKey> {
        let mut seen = HashSet::with_capacity(keys.len());
        keys.into_iter().filter(|key| seen.insert(key.clone())).collect()
    }
}

/// Sentinels are written set-if-absent unless the stored bytes are known to
/// be stale: the read was bypassed, or the entry did not decode.
fn null_write_kind<K, T>(state: &BatchState<'_, K, T>, key: &CacheKey, options: &CacheOptions) -> WriteKind
where
    K: KeyObject,
    T: Clone,
{
    if options.read_directly_from_store || state.is_unreadable(key) {
        WriteKind::Set
    } else {
        WriteKind::Add
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use cachet_core::{CachetConfig, IdentityRegistry, NullSentinel};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn coordinator() -> (BatchCacheCoordinator<InMemoryStore>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let ctx = CoordinatorContext::new(Arc::clone(&store), CachetConfig::default())
            .with_registry(Arc::new(IdentityRegistry::new()));
        (BatchCacheCoordinator::new(ctx), store)
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::build("nums", &[id]).unwrap()
    }

    #[tokio::test]
    async fn test_empty_input_skips_everything() {
        let (coordinator, _store) = coordinator();
        let calls = AtomicUsize::new(0);
        let out: Vec<Option<u32>> = coordinator
            .read_through(&Vec::<u32>::new(), &CacheOptions::new("nums"), |_missed| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CachetError>(vec![]) }
            })
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let (coordinator, store) = coordinator();
        let options = CacheOptions::new("nums");

        let first: Vec<Option<u32>> = coordinator
            .read_through(&[1u32, 2], &options, |missed| async move {
                Ok::<_, CachetError>(missed.iter().map(|n| Some(n * 10)).collect())
            })
            .await
            .unwrap();
        assert_eq!(first, vec![Some(10), Some(20)]);
        assert_eq!(store.len(), 2);

        let second: Vec<Option<u32>> = coordinator
            .read_through(&[2u32, 1], &options, |_missed| async move {
                Err::<Vec<Option<u32>>, _>(CachetError::from(ReconciliationError::LengthMismatch {
                    expected: 0,
                    got: 0,
                }))
            })
            .await
            .unwrap();
        assert_eq!(second, vec![Some(20), Some(10)]);

        let stats = coordinator.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_null_sentinel_never_reaches_caller() {
        let (coordinator, store) = coordinator();
        let options = CacheOptions::new("nums").with_add_nulls_to_cache(true);

        let out: Vec<Option<String>> = coordinator
            .read_through(&[7u32], &options, |_| async { Ok::<_, CachetError>(vec![None]) })
            .await
            .unwrap();
        assert_eq!(out, vec![None]);
        assert_eq!(store.get(&key("7")).await.unwrap(), Some(NullSentinel::WIRE.to_vec()));

        let again: Vec<Option<String>> = coordinator
            .read_through(&[7u32], &options, |_| async {
                Ok::<_, CachetError>(vec![Some("unexpected".to_string())])
            })
            .await
            .unwrap();
        assert_eq!(again, vec![None]);
    }

    #[tokio::test]
    async fn test_generate_keys_from_result() {
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Row {
            id: u32,
            name: String,
        }

        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(IdentityRegistry::new());
        registry.register(|row: &Row| row.id.to_string());
        let coordinator = BatchCacheCoordinator::new(
            CoordinatorContext::new(Arc::clone(&store), CachetConfig::default()).with_registry(registry),
        );
        let options = CacheOptions::new("nums").with_generate_keys_from_result(true);

        // The source returns rows out of order, skips id 2, and adds id 9.
        let out = coordinator
            .read_through(&[1u32, 2, 3], &options, |_missed| async {
                Ok::<_, CachetError>(vec![
                    Some(Row { id: 3, name: "c".into() }),
                    Some(Row { id: 9, name: "z".into() }),
                    Some(Row { id: 1, name: "a".into() }),
                ])
            })
            .await
            .unwrap();

        let names: Vec<Option<String>> = out.into_iter().map(|r| r.map(|r| r.name)).collect();
        assert_eq!(names, vec![Some("a".into()), None, Some("c".into())]);
        assert!(store.get(&key("9")).await.unwrap().is_some());
        assert!(store.get(&key("2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generate_keys_requires_registered_identity() {
        let (coordinator, store) = coordinator();
        let options = CacheOptions::new("nums").with_generate_keys_from_result(true);
        let calls = AtomicUsize::new(0);

        let err = coordinator
            .read_through(&[1u32], &options, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Vec<Option<u64>>, CachetError>(vec![Some(1)]) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CachetError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_write_through_then_read_hits() {
        let (coordinator, _store) = coordinator();
        let options = CacheOptions::new("nums");

        let written = coordinator
            .write_through(&[4u32, 5], &options, || async {
                Ok::<_, CachetError>(vec![Some(40u32), Some(50)])
            })
            .await
            .unwrap();
        assert_eq!(written, vec![Some(40), Some(50)]);

        let read: Vec<Option<u32>> = coordinator
            .read_through(&[5u32, 4], &options, |missed| async move {
                Ok::<_, CachetError>(missed.iter().map(|_| Some(0)).collect())
            })
            .await
            .unwrap();
        assert_eq!(read, vec![Some(50), Some(40)]);
    }

    #[tokio::test]
    async fn test_write_through_size_mismatch() {
        let (coordinator, store) = coordinator();
        let err = coordinator
            .write_through(&[1u32, 2], &CacheOptions::new("nums"), || async {
                Ok::<_, CachetError>(vec![Some(1u32)])
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CachetError::Reconciliation(ReconciliationError::LengthMismatch { expected: 2, got: 1 })
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_around_timing() {
        let (coordinator, store) = coordinator();
        let options = CacheOptions::new("nums");
        store.set(&key("1"), 0, b"1").await.unwrap();
        store.set(&key("2"), 0, b"2").await.unwrap();

        // After: a failing computation leaves the cache alone.
        let err = coordinator
            .invalidate_around(&[1u32], InvalidateTiming::After, &options, || async {
                Err::<(), _>(CachetError::from(ReconciliationError::MissingEntry {
                    key: "boom".into(),
                }))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CachetError::Reconciliation(_)));
        assert!(store.get(&key("1")).await.unwrap().is_some());

        // Before: deleted even though the computation then fails.
        let _ = coordinator
            .invalidate_around(&[2u32], InvalidateTiming::Before, &options, || async {
                Err::<(), _>(CachetError::from(ReconciliationError::MissingEntry {
                    key: "boom".into(),
                }))
            })
            .await;
        assert!(store.get(&key("2")).await.unwrap().is_none());

        let removed = coordinator.invalidate(&[1u32, 1, 3], &options).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_config_bypasses_store() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = BatchCacheCoordinator::new(CoordinatorContext::new(
            Arc::clone(&store),
            CachetConfig::default().with_disabled(true),
        ));

        let out: Vec<Option<u32>> = coordinator
            .read_through(&[1u32, 1], &CacheOptions::new("nums"), |objects| async move {
                Ok::<_, CachetError>(objects.iter().map(|n| Some(*n)).collect())
            })
            .await
            .unwrap();
        assert_eq!(out, vec![Some(1), Some(1)]);
        assert!(store.is_empty());
    }
}
