//! Result cache for foreign evaluations.
//!
//! Exact-match memoization: a key is the full input vector compared bit for
//! bit. The cache is bounded and evicts in insertion order (oldest first);
//! reading an entry does not refresh it.
//!
//! A disabled cache keeps its entries but behaves as an empty store: lookups
//! miss without being counted, inserts are dropped, nothing is evicted.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use serde::Serialize;

/// Default number of entries kept by a cache.
pub const DEFAULT_MAX_SIZE: usize = 1024;

/// Input vector used as a cache key.
///
/// Stored as raw bit patterns, so `0.0` and `-0.0` are different keys and a
/// NaN matches only a NaN with the same payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<u64>);

impl CacheKey {
    pub fn new(point: &[f64]) -> Self {
        Self(point.iter().map(|x| x.to_bits()).collect())
    }

    /// The point this key was built from.
    pub fn to_point(&self) -> Vec<f64> {
        self.0.iter().map(|&bits| f64::from_bits(bits)).collect()
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }
}

impl From<&[f64]> for CacheKey {
    fn from(point: &[f64]) -> Self {
        Self::new(point)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub enabled: bool,
}

struct CacheInner {
    entries: FxHashMap<CacheKey, Vec<f64>>,
    /// Keys in insertion order; always the same set as `entries`.
    order: VecDeque<CacheKey>,
    max_size: usize,
    enabled: bool,
    hits: u64,
    misses: u64,
}

impl CacheInner {
    fn insert(&mut self, key: CacheKey, value: Vec<f64>) {
        if !self.enabled || self.max_size == 0 {
            return;
        }

        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }

        while self.entries.len() >= self.max_size {
            self.evict_oldest();
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.order.pop_front() {
            self.entries.remove(&oldest);
        }
    }
}

/// Bounded, thread-safe map from input vectors to output vectors.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
}

impl ResultCache {
    /// Create an enabled cache holding at most `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: FxHashMap::default(),
                order: VecDeque::new(),
                max_size,
                enabled: true,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Lock the cache. Every mutation leaves the map consistent, so a
    /// poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enable(&self) {
        self.lock().enabled = true;
    }

    /// Stop serving and recording entries. Existing entries are kept.
    pub fn disable(&self) {
        self.lock().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Cached output for `point`, counting a hit or a miss.
    pub fn lookup(&self, point: &[f64]) -> Option<Vec<f64>> {
        let key = CacheKey::new(point);
        let mut inner = self.lock();
        if !inner.enabled {
            return None;
        }

        match inner.entries.get(&key).cloned() {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Whether `point` has an entry, without touching the counters.
    pub fn contains(&self, point: &[f64]) -> bool {
        let inner = self.lock();
        inner.enabled && inner.entries.contains_key(&CacheKey::new(point))
    }

    /// Add or overwrite an entry, evicting the oldest ones when full.
    ///
    /// Overwriting keeps the entry's original insertion position.
    pub fn insert(&self, point: &[f64], value: Vec<f64>) {
        self.lock().insert(CacheKey::new(point), value);
    }

    /// Copy every entry of `other` into this cache, oldest first.
    ///
    /// Capacity and eviction rules apply as for [`insert`](Self::insert).
    pub fn merge(&self, other: &ResultCache) {
        if std::ptr::eq(self, other) {
            return;
        }

        let snapshot = other.entries();
        let mut inner = self.lock();
        for (key, value) in snapshot {
            inner.insert(key, value);
        }
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> Vec<(CacheKey, Vec<f64>)> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|key| inner.entries.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Change the capacity, evicting the oldest entries if it shrinks.
    pub fn set_max_size(&self, max_size: usize) {
        let mut inner = self.lock();
        inner.max_size = max_size;
        while inner.entries.len() > max_size {
            inner.evict_oldest();
        }
    }

    pub fn max_size(&self) -> usize {
        self.lock().max_size
    }

    /// Number of stored entries, reachable or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.lock().hits
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            max_size: inner.max_size,
            hits: inner.hits,
            misses: inner.misses,
            enabled: inner.enabled,
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResultCache").field(&self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_exact_lookup() {
        let cache = ResultCache::new(8);
        cache.insert(&[1.0, 2.0], vec![3.0]);

        assert_eq!(cache.lookup(&[1.0, 2.0]), Some(vec![3.0]));
        assert_eq!(cache.lookup(&[1.0, 2.000_000_000_000_001]), None);
        assert_eq!(cache.lookup(&[2.0, 1.0]), None);
        assert_eq!(cache.lookup(&[1.0]), None);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn test_signed_zero_and_nan_keys() {
        let cache = ResultCache::new(8);
        cache.insert(&[0.0], vec![1.0]);
        cache.insert(&[f64::NAN], vec![2.0]);

        assert_eq!(cache.lookup(&[-0.0]), None);
        assert_eq!(cache.lookup(&[f64::NAN]), Some(vec![2.0]));
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = ResultCache::new(8);
        cache.insert(&[1.0], vec![10.0]);
        cache.insert(&[1.0], vec![11.0]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&[1.0]), Some(vec![11.0]));
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = ResultCache::new(3);
        for i in 0..3 {
            cache.insert(&[i as f64], vec![i as f64]);
        }
        // Reads do not refresh insertion order.
        assert!(cache.lookup(&[0.0]).is_some());

        cache.insert(&[3.0], vec![3.0]);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&[0.0]));
        assert!(cache.contains(&[1.0]));

        cache.insert(&[4.0], vec![4.0]);
        assert!(!cache.contains(&[1.0]));
        let keys: Vec<Vec<f64>> = cache.entries().iter().map(|(k, _)| k.to_point()).collect();
        assert_eq!(keys, vec![vec![2.0], vec![3.0], vec![4.0]]);
    }

    #[test]
    fn test_overwrite_does_not_refresh_position() {
        let cache = ResultCache::new(2);
        cache.insert(&[1.0], vec![1.0]);
        cache.insert(&[2.0], vec![2.0]);
        cache.insert(&[1.0], vec![100.0]);
        cache.insert(&[3.0], vec![3.0]);

        assert!(!cache.contains(&[1.0]));
        assert!(cache.contains(&[2.0]));
        assert!(cache.contains(&[3.0]));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = ResultCache::new(0);
        cache.insert(&[1.0], vec![1.0]);
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&[1.0]), None);
    }

    #[test]
    fn test_disabled_cache_is_transparent() {
        let cache = ResultCache::new(4);
        cache.insert(&[1.0], vec![1.0]);
        assert_eq!(cache.lookup(&[1.0]), Some(vec![1.0]));
        let before = cache.stats();

        cache.disable();
        assert_eq!(cache.lookup(&[1.0]), None);
        cache.insert(&[2.0], vec![2.0]);
        assert!(!cache.contains(&[1.0]));

        let during = cache.stats();
        assert_eq!(during.hits, before.hits);
        assert_eq!(during.misses, before.misses);
        assert_eq!(during.entries, 1);

        cache.enable();
        assert_eq!(cache.lookup(&[1.0]), Some(vec![1.0]));
        assert_eq!(cache.lookup(&[2.0]), None);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn test_clear_keeps_hits() {
        let cache = ResultCache::new(4);
        cache.insert(&[1.0], vec![1.0]);
        cache.lookup(&[1.0]);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.hits(), 1);
        cache.insert(&[5.0], vec![5.0]);
        assert_eq!(cache.entries().len(), 1);
    }

    #[test]
    fn test_merge_respects_capacity() {
        let target = ResultCache::new(3);
        target.insert(&[0.0], vec![0.0]);
        target.insert(&[1.0], vec![1.0]);

        let temp = ResultCache::new(10);
        temp.insert(&[1.0], vec![-1.0]);
        temp.insert(&[2.0], vec![2.0]);
        temp.insert(&[3.0], vec![3.0]);

        target.merge(&temp);

        assert_eq!(target.len(), 3);
        assert!(!target.contains(&[0.0]));
        assert_eq!(target.lookup(&[1.0]), Some(vec![-1.0]));
        assert!(target.contains(&[2.0]));
        assert!(target.contains(&[3.0]));
        assert_eq!(temp.len(), 3);

        target.merge(&target);
        assert_eq!(target.len(), 3);
    }

    #[test]
    fn test_shrink_evicts_oldest() {
        let cache = ResultCache::new(4);
        for i in 0..4 {
            cache.insert(&[i as f64], vec![]);
        }
        cache.set_max_size(2);
        assert_eq!(cache.max_size(), 2);
        let keys: Vec<Vec<f64>> = cache.entries().iter().map(|(k, _)| k.to_point()).collect();
        assert_eq!(keys, vec![vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_concurrent_inserts_stay_bounded() {
        let cache = Arc::new(ResultCache::new(50));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let x = (t * 1000 + i) as f64;
                        cache.insert(&[x], vec![x * 2.0]);
                        if let Some(v) = cache.lookup(&[x]) {
                            assert_eq!(v, vec![x * 2.0]);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 50);
        assert_eq!(cache.entries().len(), 50);
    }
}
