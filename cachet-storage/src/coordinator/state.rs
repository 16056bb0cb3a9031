//! Per-call reconciliation state for batch reads.

use std::collections::{HashMap, HashSet};

use cachet_core::{CacheEntry, CacheKey, CacheKeyBuilder, CachetResult, KeyObject, ReconciliationError};

/// Transient bookkeeping for one batch call.
///
/// Built once from the caller's input, filled from the bulk fetch and then
/// from the data source, and finally walked to produce ordered output.
/// Duplicate objects, and distinct objects that map to the same key,
/// collapse onto the first occurrence.
pub(crate) struct BatchState<'a, K, T> {
    ordered_input: &'a [K],
    object_to_key: HashMap<&'a K, CacheKey>,
    key_to_object: HashMap<CacheKey, &'a K>,
    distinct_keys: Vec<CacheKey>,
    key_to_result: HashMap<CacheKey, CacheEntry<T>>,
    unreadable: HashSet<CacheKey>,
}

impl<'a, K: KeyObject, T: Clone> BatchState<'a, K, T> {
    /// Derive keys for every object. Fails before any I/O on a bad key.
    pub(crate) fn build(
        objects: &'a [K],
        namespace: &str,
        keys: &CacheKeyBuilder,
    ) -> CachetResult<Self> {
        let mut object_to_key = HashMap::with_capacity(objects.len());
        let mut key_to_object = HashMap::with_capacity(objects.len());
        let mut distinct_keys = Vec::with_capacity(objects.len());

        for object in objects {
            if object_to_key.contains_key(object) {
                continue;
            }
            let key = keys.key_for(namespace, object)?;
            if !key_to_object.contains_key(&key) {
                key_to_object.insert(key.clone(), object);
                distinct_keys.push(key.clone());
            }
            object_to_key.insert(object, key);
        }

        Ok(Self {
            ordered_input: objects,
            object_to_key,
            key_to_object,
            distinct_keys,
            key_to_result: HashMap::new(),
            unreadable: HashSet::new(),
        })
    }

    /// Distinct keys in first-seen order.
    pub(crate) fn distinct_keys(&self) -> &[CacheKey] {
        &self.distinct_keys
    }

    /// Returns true if `key` was derived from the input.
    pub(crate) fn owns_key(&self, key: &CacheKey) -> bool {
        self.key_to_object.contains_key(key)
    }

    /// Returns true if `key` already has an entry.
    pub(crate) fn is_resolved(&self, key: &CacheKey) -> bool {
        self.key_to_result.contains_key(key)
    }

    /// Record an entry for a key. The first entry for a key wins.
    pub(crate) fn resolve(&mut self, key: CacheKey, entry: CacheEntry<T>) {
        self.key_to_result.entry(key).or_insert(entry);
    }

    /// Note a stored entry that could not be decoded.
    pub(crate) fn mark_unreadable(&mut self, key: CacheKey) {
        self.unreadable.insert(key);
    }

    /// Returns true if the store held bytes for `key` that did not decode.
    pub(crate) fn is_unreadable(&self, key: &CacheKey) -> bool {
        self.unreadable.contains(key)
    }

    /// Keys still without an entry, with their representative object, in
    /// first-seen order.
    pub(crate) fn missed(&self) -> Vec<(CacheKey, &'a K)> {
        self.distinct_keys
            .iter()
            .filter(|key| !self.key_to_result.contains_key(*key))
            .filter_map(|key| {
                self.key_to_object
                    .get(key)
                    .map(|object| (key.clone(), *object))
            })
            .collect()
    }

    /// Walk the original input (duplicates included) and emit values.
    ///
    /// Null entries become `None`, or are dropped when `skip_nulls` is set.
    /// A key without an entry is an internal error, never a guess.
    pub(crate) fn assemble(&self, skip_nulls: bool) -> CachetResult<Vec<Option<T>>> {
        let mut output = Vec::with_capacity(self.ordered_input.len());
        for object in self.ordered_input {
            let key = self.object_to_key.get(object).ok_or_else(|| {
                ReconciliationError::MissingEntry {
                    key: object.to_string(),
                }
            })?;
            match self.key_to_result.get(key) {
                Some(CacheEntry::Value(value)) => output.push(Some(value.clone())),
                Some(CacheEntry::Null(_)) => {
                    if !skip_nulls {
                        output.push(None);
                    }
                }
                None => {
                    return Err(ReconciliationError::MissingEntry {
                        key: key.to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(output)
    }
}
