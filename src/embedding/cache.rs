//! Summary-vector cache with zero-copy sharing via Arc<[f32]>
//!
//! Candidate recall re-scores the same recent episodes every turn, so the
//! summary vectors are kept here instead of re-encoding them:
//! - LRU eviction by entry count
//! - Zero-copy sharing via Arc<[f32]>
//! - Thread-safe access with atomic hit/miss counters

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics for the embedding cache
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub max_entries: usize,
    /// Hit rate as percentage (0.0 - 100.0)
    pub hit_rate: f64,
}

struct CacheEntry {
    vector: Arc<[f32]>,
    last_used: u64,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Monotonic access clock
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Thread-safe LRU cache of text -> vector
pub struct EmbeddingCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
            }),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a vector from the cache
    ///
    /// Returns an Arc clone (cheap pointer copy, not vector copy)
    pub fn get(&self, key: &str) -> Option<Arc<[f32]>> {
        let mut state = self.state.lock();
        let tick = state.next_tick();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.vector.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a vector, evicting the least recently used entry when full
    pub fn put(&self, key: String, vector: Arc<[f32]>) {
        if self.max_entries == 0 {
            return;
        }
        let mut state = self.state.lock();
        let tick = state.next_tick();
        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            state.evict_lru();
        }
        state.entries.insert(
            key,
            CacheEntry {
                vector,
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        EmbeddingCacheStats {
            hits,
            misses,
            entries: self.len(),
            max_entries: self.max_entries,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64 * 100.0
            },
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_of(v: f32) -> Arc<[f32]> {
        vec![v; 4].into()
    }

    #[test]
    fn test_get_put() {
        let cache = EmbeddingCache::new(4);
        assert!(cache.get("a").is_none());
        cache.put("a".into(), vec_of(1.0));
        assert_eq!(cache.get("a").unwrap()[0], 1.0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = EmbeddingCache::new(2);
        cache.put("a".into(), vec_of(1.0));
        cache.put("b".into(), vec_of(2.0));
        // touch a so b becomes the oldest
        cache.get("a");
        cache.put("c".into(), vec_of(3.0));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_never_stores() {
        let cache = EmbeddingCache::new(0);
        cache.put("a".into(), vec_of(1.0));
        assert!(cache.is_empty());
    }
}
