//! Process-wide inference caches
//!
//! Two bounded maps shared across every virtual user, amortizing document
//! parsing over repeated page loads:
//!
//! - parsed-stylesheet cache: stylesheet URI → embedded resource list
//! - inferred-resources cache: (config identity, document URI) →
//!   (validator, built request list)
//!
//! Entries are independent; correctness never depends on retention, only on
//! "if present, the stored validator is meaningful". Eviction is plain LRU.

use crate::config::{ConfigId, FetchConfig};
use crate::request::{EmbeddedResource, SubRequest};
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use url::Url;

/// A thread-safe bounded map with atomic entry operations
///
/// `lru::LruCache` behind a mutex; every operation takes the lock once, so
/// `get_or_insert_with` is atomic per key and an equal value is shared by
/// all concurrent readers.
pub struct BoundedCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a value, refreshing its recency
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    /// Insert a value, returning the previous one if any
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().put(key, value)
    }

    /// Remove a value
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key)
    }

    /// Whether a key is present (without refreshing recency)
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    /// Look up a value, creating and caching it on miss
    pub fn get_or_insert_with(&self, key: K, create: impl FnOnce() -> V) -> V {
        self.inner.lock().get_or_insert(key, create).clone()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<K: Hash + Eq, V: Clone> std::fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedCache")
            .field("len", &inner.len())
            .field("capacity", &inner.cap())
            .finish()
    }
}

/// Key of the inferred-resources cache
///
/// Document identity is the pair of protocol configuration and URI: two
/// configs may infer different requests from the same document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InferredResourcesKey {
    /// Identity of the fetch configuration
    pub config: ConfigId,
    /// URI of the parsed document
    pub uri: Url,
}

/// A cached inference result: the validator it was parsed under and the
/// request list it produced
#[derive(Debug, Clone)]
pub struct InferredPageResources {
    /// Validator (`Last-Modified` or `ETag`) of the parsed document version
    pub validator: String,
    /// Built requests inferred from that version
    pub requests: Vec<SubRequest>,
}

/// The shared cache pair
///
/// One instance per process, handed to every virtual user via `Arc`.
#[derive(Debug)]
pub struct ResourceCaches {
    /// Stylesheet URI → parsed embedded-resource list
    pub css: BoundedCache<Url, Arc<Vec<EmbeddedResource>>>,
    /// (config, document URI) → inferred page resources
    pub inferred: BoundedCache<InferredResourcesKey, Arc<InferredPageResources>>,
}

impl ResourceCaches {
    /// Create caches sized by the given configuration
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            css: BoundedCache::new(config.css_cache_capacity),
            inferred: BoundedCache::new(config.html_cache_capacity),
        }
    }
}
