//! First-turn response cache.
//!
//! Keyed by the SHA-256 of the query text and the requested synthesis
//! depth. Only context-free responses belong here, so callers insert and
//! look up on a session's first turn only. Bounded by a FIFO max-entries
//! policy.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Stable fingerprint of `(query, mode)`.
pub fn cache_key(query: &str, mode: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(mode.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

struct Entries<V> {
    map: HashMap<String, V>,
    order: VecDeque<String>,
}

pub struct ResponseCache<V> {
    max_entries: usize,
    entries: Mutex<Entries<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a response, counting the hit or miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let found = self.lock().map.get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store a response, evicting the oldest insertion when full.
    ///
    /// A zero-capacity cache stores nothing.
    pub fn insert(&self, key: String, value: V) {
        if self.max_entries == 0 {
            return;
        }
        let mut e = self.lock();
        if e.map.insert(key.clone(), value).is_some() {
            return;
        }
        e.order.push_back(key);
        while e.order.len() > self.max_entries {
            if let Some(oldest) = e.order.pop_front() {
                e.map.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}
