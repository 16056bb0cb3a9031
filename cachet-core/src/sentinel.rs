//! Null sentinel and the logical cache entry.

use std::fmt;

/// Marker meaning "this key legitimately maps to no value".
///
/// It only exists inside the cache wire format; callers always see `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NullSentinel;

impl NullSentinel {
    /// Wire representation of the sentinel.
    ///
    /// Starts with a NUL byte, which no JSON document can, so a stored value
    /// can never be mistaken for the sentinel.
    pub const WIRE: &'static [u8] = b"\0cachet:null";

    /// Returns true if `bytes` is exactly the sentinel's wire form.
    pub fn matches(bytes: &[u8]) -> bool {
        bytes == Self::WIRE
    }
}

impl fmt::Display for NullSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<null>")
    }
}

/// A value stored in, or retrieved from, the cache.
///
/// "Absent" is deliberately not a variant: a key missing from the store is
/// represented by the key missing from a map (or `None` from a single get).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry<T> {
    /// A real value.
    Value(T),
    /// The key is known to map to nothing.
    Null(NullSentinel),
}

impl<T> CacheEntry<T> {
    /// The null entry.
    pub const fn null() -> Self {
        Self::Null(NullSentinel)
    }

    /// Wrap an optional value, turning `None` into the sentinel.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Value(v),
            None => Self::null(),
        }
    }

    /// Unwrap into what the caller sees: the sentinel becomes `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Null(_) => None,
        }
    }

    /// Borrowing variant of [`CacheEntry::into_option`].
    pub fn as_option(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Null(_) => None,
        }
    }

    /// Returns true if this is the null sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }
}

impl<T> From<Option<T>> for CacheEntry<T> {
    fn from(value: Option<T>) -> Self {
        Self::from_option(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_only_equals_itself() {
        assert_eq!(NullSentinel, NullSentinel);
        assert!(NullSentinel::matches(NullSentinel::WIRE));
        assert!(!NullSentinel::matches(b"null"));
        assert!(!NullSentinel::matches(b""));
    }

    #[test]
    fn test_entry_option_roundtrip() {
        let entry: CacheEntry<i32> = None.into();
        assert!(entry.is_null());
        assert_eq!(entry.into_option(), None);

        let entry = CacheEntry::from_option(Some(5));
        assert_eq!(entry.as_option(), Some(&5));
        assert_eq!(entry.into_option(), Some(5));
    }
}
