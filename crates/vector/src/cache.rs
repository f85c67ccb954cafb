//! Content-addressed query cache.
//!
//! Keys are SHA-256 over the query text and date filter; entries expire
//! after 24 hours and the whole cache is dropped on any index mutation.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a cached result stays valid with no index mutation.
pub const QUERY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct CacheSlot<T> {
    value: T,
    inserted_at: Instant,
}

/// TTL cache keyed by query content.
pub struct QueryCache<T> {
    slots: HashMap<[u8; 32], CacheSlot<T>>,
    ttl: Duration,
}

impl<T: Clone> QueryCache<T> {
    pub fn new() -> Self {
        Self::with_ttl(QUERY_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            ttl,
        }
    }

    /// Hash a query string plus its filter token into a cache key.
    pub fn key(query: &str, filter_token: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        hasher.update(filter_token.as_bytes());
        hasher.finalize().into()
    }

    /// Look up a non-expired entry. Expired entries found on the way are
    /// collected lazily.
    pub fn get(&mut self, key: &[u8; 32]) -> Option<T> {
        let expired = match self.slots.get(key) {
            Some(slot) => slot.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.slots.remove(key);
            return None;
        }
        self.slots.get(key).map(|slot| slot.value.clone())
    }

    pub fn insert(&mut self, key: [u8; 32], value: T) {
        self.purge_expired();
        self.slots.insert(
            key,
            CacheSlot {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop everything; called on every index mutation.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.slots.retain(|_, slot| slot.inserted_at.elapsed() <= ttl);
    }
}

impl<T: Clone> Default for QueryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
