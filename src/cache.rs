// Scope-keyed TTL cache backing lookups and capability resolution

//! # TTL Cache
//!
//! A deliberately small cache: a reader-writer locked map of `(value,
//! expires_at)` entries. Readers dominate; writers appear on miss and on
//! invalidation. Keys widen with scope - `k`, `k:tenant`, `k:tenant:partition` -
//! so tenant data can never bleed across tenants through the cache.
//!
//! Eviction is intentionally weak: when the cache is full, expired entries
//! are dropped, and if everything is still live an arbitrary entry makes
//! room. There is no LRU and no background sweeper; expiry is checked on
//! read.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::models::{CacheScope, RequestContext};

/// Compose a cache key from a base and the definition's scope.
pub fn scoped_key(base: &str, scope: CacheScope, rctx: &RequestContext) -> String {
    match scope {
        CacheScope::Global => base.to_string(),
        CacheScope::Tenant => format!("{base}:{}", rctx.tenant_id),
        CacheScope::Partition => format!("{base}:{}:{}", rctx.tenant_id, rctx.partition_id),
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Bounded TTL cache. `V` is cloned out on hit.
pub struct TtlCache<V> {
    capacity: usize,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize) -> Self {
        TtlCache {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Clone the live value under `key`, if any. Expired entries read as
    /// absent; they are physically removed on the next write.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Insert under `key` with the given TTL, keeping the cache within its
    /// capacity bound.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let key = key.into();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let now = Instant::now();
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.capacity {
                // everything is live: sacrifice an arbitrary entry
                if let Some(victim) = entries.keys().next().cloned() {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Remove every entry whose key starts with `prefix` and, when given,
    /// also contains `fragment`.
    pub fn invalidate(&self, prefix: &str, fragment: Option<&str>) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.retain(|key, _| {
            let hit = key.starts_with(prefix)
                && fragment.map(|f| key.contains(f)).unwrap_or(true);
            !hit
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
