//! Per-party scratch storage.
//!
//! Matching and merging algorithms memoize per-party computed values (for
//! example resolved matchmaking settings) so they are computed once per party
//! regardless of how many passes touch it. Keys are algorithm-specific
//! namespaced strings such as `"quickqueue.settings"`.

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

/// Typed key/value scratch space attached to a [`Party`](crate::types::Party).
///
/// Clones share the same underlying storage, so a party model re-fetched from
/// the party scene can re-attach the storage it used on a previous pass and
/// keep its memoized values.
#[derive(Clone, Default)]
pub struct CacheStorage {
    entries: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves a previously stored value, if its type matches.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Stores a value, replacing any previous entry under the same key.
    pub fn insert<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries.insert(key.into(), value.clone());
        value
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("entries", &self.entries.len())
            .finish()
    }
}
