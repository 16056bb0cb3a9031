//! Cache key construction.
//!
//! Wire format: `namespace:id1/id2/.../idN`. The colon separates the
//! namespace from the identity path; the slash separates the components of
//! a compound identity. Keys are validated before any store round-trip.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{CachetResult, ConfigError};
use crate::identity::IdentityRegistry;

/// Separator between namespace and identity path.
pub const NAMESPACE_SEPARATOR: char = ':';

/// Separator between the components of a compound identity.
pub const ID_SEPARATOR: char = '/';

/// Longest key accepted by default (memcached's limit).
pub const DEFAULT_MAX_KEY_LENGTH: usize = 250;

/// A validated cache key.
///
/// Only [`CacheKey::build`] and [`CacheKeyBuilder`] construct keys, so every
/// key in circulation has a non-empty namespace and non-empty identity parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from a namespace and an ordered list of identity parts.
    ///
    /// Pure and deterministic: the same inputs always give the same key.
    pub fn build<S: AsRef<str>>(namespace: &str, ids: &[S]) -> CachetResult<Self> {
        validate_namespace(namespace)?;
        if ids.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ids".to_string(),
            }
            .into());
        }

        let mut key = String::with_capacity(
            namespace.len() + 1 + ids.iter().map(|id| id.as_ref().len() + 1).sum::<usize>(),
        );
        key.push_str(namespace);
        key.push(NAMESPACE_SEPARATOR);
        for (i, id) in ids.iter().enumerate() {
            let id = id.as_ref();
            validate_id(id)?;
            if i > 0 {
                key.push(ID_SEPARATOR);
            }
            key.push_str(id);
        }
        Ok(Self(key))
    }

    /// The key as it goes over the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace portion of the key.
    pub fn namespace(&self) -> &str {
        self.0
            .split_once(NAMESPACE_SEPARATOR)
            .map(|(ns, _)| ns)
            .unwrap_or(&self.0)
    }

    /// The identity path (everything after the namespace separator).
    pub fn id_path(&self) -> &str {
        self.0
            .split_once(NAMESPACE_SEPARATOR)
            .map(|(_, ids)| ids)
            .unwrap_or("")
    }

    /// Consume the key, returning the owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_namespace(namespace: &str) -> CachetResult<()> {
    if namespace.trim().is_empty() {
        return Err(ConfigError::invalid("namespace", namespace, "namespace must not be empty").into());
    }
    if namespace.contains(NAMESPACE_SEPARATOR) {
        return Err(ConfigError::invalid(
            "namespace",
            namespace,
            "namespace must not contain the ':' separator",
        )
        .into());
    }
    if has_forbidden_chars(namespace) {
        return Err(ConfigError::invalid(
            "namespace",
            namespace,
            "namespace must not contain whitespace or control characters",
        )
        .into());
    }
    Ok(())
}

fn validate_id(id: &str) -> CachetResult<()> {
    if id.trim().is_empty() {
        return Err(ConfigError::invalid("id", id, "identity must not be empty or whitespace").into());
    }
    if has_forbidden_chars(id) {
        return Err(ConfigError::invalid(
            "id",
            id,
            "identity must not contain whitespace or control characters",
        )
        .into());
    }
    Ok(())
}

fn has_forbidden_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// An identity made of several ordered components.
///
/// Displayed joined with [`ID_SEPARATOR`], so it can be used directly as a
/// key object for compound keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    parts: Vec<String>,
}

impl CompositeKey {
    /// Create a compound identity. Every part must be a valid identity.
    pub fn new<I, S>(parts: I) -> CachetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        if parts.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "composite key parts".to_string(),
            }
            .into());
        }
        for part in &parts {
            validate_id(part)?;
        }
        Ok(Self { parts })
    }

    /// The ordered identity components.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", ID_SEPARATOR)?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

/// Builds cache keys for key objects and returned values.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    registry: Arc<IdentityRegistry>,
    max_key_length: usize,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new(IdentityRegistry::global())
    }
}

impl CacheKeyBuilder {
    /// Create a builder over an identity registry.
    pub fn new(registry: Arc<IdentityRegistry>) -> Self {
        Self {
            registry,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }

    /// Set the maximum accepted key length.
    pub fn with_max_key_length(mut self, max: usize) -> Self {
        self.max_key_length = max;
        self
    }

    /// Get the identity registry.
    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Get the maximum accepted key length.
    pub fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    /// Build a key, enforcing the length limit.
    pub fn build_key<S: AsRef<str>>(&self, namespace: &str, ids: &[S]) -> CachetResult<CacheKey> {
        let key = CacheKey::build(namespace, ids)?;
        if key.as_str().len() > self.max_key_length {
            return Err(ConfigError::InvalidValue {
                field: "key".to_string(),
                value: key.into_string(),
                reason: format!("key exceeds {} bytes", self.max_key_length),
            }
            .into());
        }
        Ok(key)
    }

    /// Key for a key object: registered identity, or `Display` fallback.
    pub fn key_for<K>(&self, namespace: &str, object: &K) -> CachetResult<CacheKey>
    where
        K: Any + fmt::Display,
    {
        let id = self.registry.derive_id(object)?;
        self.build_key(namespace, &[id])
    }

    /// Key for a returned value, which must have a registered identity.
    pub fn key_for_result<T: Any>(&self, namespace: &str, value: &T) -> CachetResult<CacheKey> {
        let id = self.registry.derive_registered(value)?;
        self.build_key(namespace, &[id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CachetError;
    use proptest::prelude::*;

    #[test]
    fn test_build_single_id() {
        let key = CacheKey::build("users", &["42"]).unwrap();
        assert_eq!(key.as_str(), "users:42");
        assert_eq!(key.namespace(), "users");
        assert_eq!(key.id_path(), "42");
    }

    #[test]
    fn test_build_compound_id() {
        let key = CacheKey::build("orders", &["eu", "2024", "17"]).unwrap();
        assert_eq!(key.to_string(), "orders:eu/2024/17");
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let err = CacheKey::build("", &["1"]).unwrap_err();
        assert!(matches!(err, CachetError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_namespace_with_separator_rejected() {
        assert!(CacheKey::build("a:b", &["1"]).is_err());
    }

    #[test]
    fn test_blank_id_rejected() {
        assert!(CacheKey::build("ns", &["1", "  "]).is_err());
        assert!(CacheKey::build("ns", &[""]).is_err());
        assert!(CacheKey::build("ns", &["has space"]).is_err());
    }

    #[test]
    fn test_no_ids_rejected() {
        let ids: [&str; 0] = [];
        let err = CacheKey::build("ns", &ids).unwrap_err();
        assert!(matches!(err, CachetError::Config(ConfigError::MissingRequired { .. })));
    }

    #[test]
    fn test_composite_key_display() {
        let composite = CompositeKey::new(["tenant-1", "doc-9"]).unwrap();
        assert_eq!(composite.to_string(), "tenant-1/doc-9");
        assert_eq!(composite.parts().len(), 2);

        let builder = CacheKeyBuilder::new(Arc::new(IdentityRegistry::new()));
        let key = builder.key_for("docs", &composite).unwrap();
        assert_eq!(key.as_str(), "docs:tenant-1/doc-9");
    }

    #[test]
    fn test_composite_key_rejects_blank_part() {
        assert!(CompositeKey::new(["a", ""]).is_err());
        assert!(CompositeKey::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_builder_enforces_max_length() {
        let builder = CacheKeyBuilder::new(Arc::new(IdentityRegistry::new())).with_max_key_length(10);
        assert!(builder.build_key("ns", &["1234567"]).is_ok());
        assert!(builder.build_key("ns", &["12345678"]).is_err());
    }

    #[test]
    fn test_key_for_uses_registry() {
        let registry = Arc::new(IdentityRegistry::new());
        registry.register(|n: &u64| format!("n{}", n));
        let builder = CacheKeyBuilder::new(registry);

        assert_eq!(builder.key_for("nums", &5u64).unwrap().as_str(), "nums:n5");
        assert_eq!(builder.key_for("nums", &5u32).unwrap().as_str(), "nums:5");
        assert_eq!(builder.key_for_result("nums", &5u64).unwrap().as_str(), "nums:n5");
        assert!(builder.key_for_result("nums", &5u32).is_err());
    }

    fn id_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_.-]{1,12}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: key building is pure and deterministic.
        #[test]
        fn prop_build_key_is_deterministic(
            namespace in "[a-z]{1,10}",
            ids in prop::collection::vec(id_strategy(), 1..5),
        ) {
            let first = CacheKey::build(&namespace, &ids).expect("valid inputs");
            let second = CacheKey::build(&namespace, &ids).expect("valid inputs");
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.namespace(), namespace.as_str());
            prop_assert_eq!(first.id_path(), ids.join("/"));
        }

        /// Property: different id lists under one namespace never collide.
        #[test]
        fn prop_distinct_ids_give_distinct_keys(
            a in id_strategy(),
            b in id_strategy(),
        ) {
            let ka = CacheKey::build("ns", &[&a]).expect("valid");
            let kb = CacheKey::build("ns", &[&b]).expect("valid");
            prop_assert_eq!(a == b, ka == kb);
        }
    }
}
