//! Bounded LRU cache with pluggable entry weights
//!
//! Used by the router to keep view instances alive between filesystem calls
//! and by the views themselves to memoize expensive lookups (blob reads,
//! ignore decisions).
//!
//! Entries live in an arena addressed by index. A sentinel slot at index 0
//! anchors a circular doubly linked recency list: `sentinel.next` is the
//! least recently used entry, `sentinel.prev` the most recently used one.
//! The whole structure sits behind a single mutex.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const SENTINEL: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("entry weight {weight} exceeds cache capacity {capacity}")]
    CapacityExceeded { weight: u64, capacity: u64 },
}

type Weigher<V> = Box<dyn Fn(&V) -> u64 + Send + Sync>;

struct Node<K, V> {
    key: Option<K>,
    value: Option<V>,
    weight: u64,
    /// Insertion sequence, only used for diagnostic iteration
    seq: u64,
    prev: usize,
    next: usize,
}

impl<K, V> Node<K, V> {
    fn vacant() -> Self {
        Self {
            key: None,
            value: None,
            weight: 0,
            seq: 0,
            prev: SENTINEL,
            next: SENTINEL,
        }
    }
}

struct Inner<K, V> {
    map: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    free: Vec<usize>,
    total_weight: u64,
    next_seq: u64,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            nodes: vec![Node::vacant()],
            free: Vec::new(),
            total_weight: 0,
            next_seq: 0,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
    }

    /// Link `idx` as the most recently used entry
    fn push_back(&mut self, idx: usize) {
        let last = self.nodes[SENTINEL].prev;
        self.nodes[idx].prev = last;
        self.nodes[idx].next = SENTINEL;
        self.nodes[last].next = idx;
        self.nodes[SENTINEL].prev = idx;
    }

    fn promote(&mut self, idx: usize) {
        self.unlink(idx);
        self.push_back(idx);
    }

    /// Detach an entry and return its slot to the free list
    fn remove_at(&mut self, idx: usize) -> (K, V, u64) {
        self.unlink(idx);
        let node = &mut self.nodes[idx];
        let key = node.key.take();
        let value = node.value.take();
        let seq = node.seq;
        self.total_weight -= node.weight;
        node.weight = 0;
        self.free.push(idx);
        match (key, value) {
            (Some(key), Some(value)) => {
                self.map.remove(&key);
                (key, value, seq)
            }
            // linked slots always hold a key and a value
            _ => unreachable!("cache slot {idx} linked without contents"),
        }
    }

    fn insert(&mut self, key: K, value: V, weight: u64, seq: u64) {
        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.nodes.push(Node::vacant());
                self.nodes.len() - 1
            }
        };
        let node = &mut self.nodes[idx];
        node.key = Some(key.clone());
        node.value = Some(value);
        node.weight = weight;
        node.seq = seq;
        self.total_weight += weight;
        self.map.insert(key, idx);
        self.push_back(idx);
    }

    fn least_recent(&self) -> Option<usize> {
        match self.nodes[SENTINEL].next {
            SENTINEL => None,
            idx => Some(idx),
        }
    }
}

/// Fixed-capacity mapping with least-recently-used eviction
///
/// Capacity is expressed in weight units. By default every entry weighs 1,
/// so capacity is simply the maximum number of entries.
pub struct BoundedCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: u64,
    weigher: Weigher<V>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache where every entry has weight 1
    pub fn new(capacity: u64) -> Self {
        Self::with_weigher(capacity, |_| 1)
    }

    /// Create a cache with a custom per-entry weight function
    pub fn with_weigher(capacity: u64, weigher: impl Fn(&V) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            capacity,
            weigher: Box::new(weigher),
        }
    }

    /// Look up a key, promoting it to most recently used on hit
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let idx = *inner.map.get(key)?;
        inner.promote(idx);
        inner.nodes[idx].value.clone()
    }

    /// Insert or replace a value, evicting least recently used entries first
    ///
    /// Returns the previous value for the key, if any. Replacing a key keeps
    /// its original insertion position for [`BoundedCache::keys`].
    pub fn put(&self, key: K, value: V) -> Result<Option<V>, CacheError> {
        let weight = (self.weigher)(&value);
        if weight > self.capacity {
            return Err(CacheError::CapacityExceeded {
                weight,
                capacity: self.capacity,
            });
        }

        let mut inner = self.inner.lock();
        let (previous, seq) = match inner.map.get(&key).copied() {
            Some(idx) => {
                let (_, old, seq) = inner.remove_at(idx);
                (Some(old), seq)
            }
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                (None, seq)
            }
        };

        while inner.total_weight + weight > self.capacity {
            let Some(idx) = inner.least_recent() else {
                break;
            };
            inner.remove_at(idx);
        }

        inner.insert(key, value, weight, seq);
        Ok(previous)
    }

    /// Remove a key, returning its value
    pub fn delete(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let idx = *inner.map.get(key)?;
        let (_, value, _) = inner.remove_at(idx);
        Some(value)
    }

    /// Memoize `compute` under `key`
    ///
    /// The computation runs outside the lock, so two racing callers may both
    /// compute; the later insert wins. Values heavier than the whole cache
    /// are returned without being stored.
    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        if let Err(e) = self.put(key, value.clone()) {
            tracing::debug!("not memoizing value: {}", e);
        }
        value
    }

    /// Fallible variant of [`BoundedCache::get_or_insert_with`]; errors are not cached
    pub fn try_get_or_insert_with<E>(
        &self,
        key: K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute()?;
        if let Err(e) = self.put(key, value.clone()) {
            tracing::debug!("not memoizing value: {}", e);
        }
        Ok(value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
    }

    /// Current keys in insertion order (diagnostics only)
    pub fn keys(&self) -> Vec<K> {
        let inner = self.inner.lock();
        let mut entries: Vec<(u64, K)> = inner
            .map
            .iter()
            .map(|(key, &idx)| (inner.nodes[idx].seq, key.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, key)| key).collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.map.len(),
            weight: inner.total_weight,
            capacity: self.capacity,
        }
    }
}

impl<K, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedCache")
            .field("entries", &inner.map.len())
            .field("weight", &inner.total_weight)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub weight: u64,
    pub capacity: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_evicts_oldest_when_full() {
        let cache = BoundedCache::new(3);
        for i in 0..4 {
            cache.put(i, i * 10).unwrap();
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_read_promotes_entry() {
        let cache = BoundedCache::new(3);
        cache.put("k1", 1).unwrap();
        cache.put("k2", 2).unwrap();
        cache.put("k3", 3).unwrap();

        // k1 is the oldest; touching it makes it the most recent
        assert_eq!(cache.get(&"k1"), Some(1));

        cache.put("n1", 4).unwrap();
        cache.put("n2", 5).unwrap();
        assert!(cache.contains(&"k1"));
        assert!(!cache.contains(&"k2"));
        assert!(!cache.contains(&"k3"));
    }

    #[test]
    fn test_capacity_new_keys_after_read_keeps_only_read_key() {
        let capacity = 4u64;
        let cache = BoundedCache::new(capacity);
        for i in 0..capacity {
            cache.put(format!("old{}", i), i).unwrap();
        }
        cache.get(&"old0".to_string());
        for i in 0..capacity - 1 {
            cache.put(format!("new{}", i), i).unwrap();
        }

        // every original key except the promoted one has been evicted
        let originals: Vec<bool> = (0..capacity)
            .map(|i| cache.contains(&format!("old{}", i)))
            .collect();
        assert_eq!(originals, vec![true, false, false, false]);
        assert_eq!(cache.len(), 4);

        // the promoted key is now the least recent one
        cache.put("last".to_string(), 99).unwrap();
        assert!(!cache.contains(&"old0".to_string()));
    }

    #[test]
    fn test_weight_exceeding_capacity_rejected() {
        let cache: BoundedCache<&str, Vec<u8>> =
            BoundedCache::with_weigher(10, |v: &Vec<u8>| v.len() as u64);

        let err = cache.put("big", vec![0; 11]).unwrap_err();
        assert_eq!(
            err,
            CacheError::CapacityExceeded {
                weight: 11,
                capacity: 10
            }
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_weighted_eviction_makes_room() {
        let cache = BoundedCache::with_weigher(10, |v: &Vec<u8>| v.len() as u64);
        cache.put("a", vec![0; 4]).unwrap();
        cache.put("b", vec![0; 4]).unwrap();
        cache.put("c", vec![0; 5]).unwrap();

        // a had to go to fit c; b + c = 9
        assert!(!cache.contains(&"a"));
        assert_eq!(cache.stats().weight, 9);
    }

    #[test]
    fn test_update_replaces_and_keeps_insertion_order() {
        let cache = BoundedCache::new(5);
        cache.put("a", 1).unwrap();
        cache.put("b", 2).unwrap();

        let previous = cache.put("a", 10).unwrap();
        assert_eq!(previous, Some(1));
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.keys(), vec!["a", "b"]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_keys_are_insertion_ordered_not_recency_ordered() {
        let cache = BoundedCache::new(5);
        cache.put(1, ()).unwrap();
        cache.put(2, ()).unwrap();
        cache.put(3, ()).unwrap();
        cache.get(&1);

        assert_eq!(cache.keys(), vec![1, 2, 3]);
    }

    #[test]
    fn test_delete_frees_slot() {
        let cache = BoundedCache::new(2);
        cache.put("a", 1).unwrap();
        cache.put("b", 2).unwrap();

        assert_eq!(cache.delete(&"a"), Some(1));
        assert_eq!(cache.delete(&"a"), None);

        cache.put("c", 3).unwrap();
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_or_insert_with_memoizes() {
        let cache = BoundedCache::new(4);
        let mut calls = 0;
        let first = cache.get_or_insert_with("x", || {
            calls += 1;
            42
        });
        let second = cache.get_or_insert_with("x", || {
            calls += 1;
            0
        });

        assert_eq!(first, 42);
        assert_eq!(second, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_try_get_or_insert_does_not_cache_errors() {
        let cache: BoundedCache<&str, u32> = BoundedCache::new(4);
        let failed: Result<u32, &str> = cache.try_get_or_insert_with("x", || Err("boom"));
        assert!(failed.is_err());
        assert!(!cache.contains(&"x"));
    }

    #[test]
    fn test_concurrent_puts_stay_within_capacity() {
        let cache = Arc::new(BoundedCache::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        cache.put(t * 1000 + i, i).unwrap();
                        cache.get(&(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 64);
        assert_eq!(cache.stats().weight, 64);
    }
}
