//! Identity derivation for key objects.
//!
//! Every cacheable unit is identified by a key object. The identity string
//! that ends up in the cache key comes from an identity function registered
//! for the object's type, or from its `Display` output when none is
//! registered. Registrations are append-only and process-wide safe.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::{CachetResult, ConfigError};

/// A value that identifies one cacheable unit.
///
/// Key objects are used as map keys while reconciling a batch, so they need
/// value equality and stable hashing. `Display` is the fallback identity
/// when no identity function is registered for the type.
pub trait KeyObject: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static {}

impl<T> KeyObject for T where T: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static {}

type IdentityFn = Arc<dyn Fn(&dyn Any) -> Option<String> + Send + Sync>;

static GLOBAL: Lazy<Arc<IdentityRegistry>> = Lazy::new(|| Arc::new(IdentityRegistry::new()));

/// Mapping from a runtime type to the function that extracts its identity.
#[derive(Default)]
pub struct IdentityRegistry {
    methods: DashMap<TypeId, IdentityFn>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used when none is injected.
    pub fn global() -> Arc<IdentityRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Register the identity function for `T`.
    ///
    /// The first registration for a type wins; later calls for the same type
    /// are ignored and return `false`.
    pub fn register<T, F>(&self, identity: F) -> bool
    where
        T: Any,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        let method: IdentityFn =
            Arc::new(move |value: &dyn Any| value.downcast_ref::<T>().map(&identity));

        match self.methods.entry(TypeId::of::<T>()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(method);
                true
            }
        }
    }

    /// Returns true if an identity function is registered for `T`.
    pub fn is_registered<T: Any>(&self) -> bool {
        self.methods.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Derive the identity of a key object, falling back to `Display`.
    pub fn derive_id<K>(&self, object: &K) -> CachetResult<String>
    where
        K: Any + fmt::Display,
    {
        let id = match self.lookup(object) {
            Some(id) => id,
            None => object.to_string(),
        };
        non_empty(id, std::any::type_name::<K>())
    }

    /// Derive the identity of a value that must carry a registered identity.
    ///
    /// Used when keys are generated from returned values; there is no
    /// sensible fallback for arbitrary result types.
    pub fn derive_registered<T: Any>(&self, value: &T) -> CachetResult<String> {
        let type_name = std::any::type_name::<T>();
        let id = self.lookup(value).ok_or_else(|| ConfigError::MissingRequired {
            field: format!("identity function for {}", type_name),
        })?;
        non_empty(id, type_name)
    }

    fn lookup<T: Any>(&self, value: &T) -> Option<String> {
        // Clone the Arc out so the shard lock is released before calling user code.
        let method = self
            .methods
            .get(&TypeId::of::<T>())
            .map(|entry| Arc::clone(entry.value()))?;
        (*method)(value as &dyn Any)
    }
}

impl fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("registered_types", &self.methods.len())
            .finish()
    }
}

fn non_empty(id: String, type_name: &str) -> CachetResult<String> {
    if id.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "identity".to_string(),
            value: id,
            reason: format!("identity derived from {} is empty", type_name),
        }
        .into());
    }
    Ok(id)
}
