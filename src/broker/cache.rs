//! Bounded least-recently-used cache for token records.
//!
//! Capacity is fixed at construction. Inserting past capacity silently evicts
//! the entry that was touched least recently; `get`, `get_mut` and `insert`
//! all count as a touch.

use crate::broker::record::TokenRecord;
use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Default number of actions the broker keeps tokens for.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// The broker's token cache, keyed by action name.
pub type TokenCache = LruCache<String, TokenRecord>;

/// A fixed-capacity map that evicts the least-recently-touched entry.
///
/// # Example
///
/// ```rust
/// use turnstile_broker::LruCache;
///
/// let mut cache = LruCache::new(2);
/// cache.insert("a", 1);
/// cache.insert("b", 2);
/// cache.get("a");          // "a" is now most recently used
/// cache.insert("c", 3);    // evicts "b"
///
/// assert!(cache.peek("b").is_none());
/// assert_eq!(cache.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    entries: HashMap<K, V>,
    // Oldest first; the back is the most recently used key.
    order: VecDeque<K>,
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Looks up an entry and marks it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get(key)
    }

    /// Mutable lookup; marks the entry most recently used.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get_mut(key)
    }

    /// Looks up an entry without changing its recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    /// Inserts or replaces an entry, making it the most recently used.
    ///
    /// Returns the evicted entry if the insert pushed the cache over capacity.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
        } else {
            self.order.push_back(key);
        }

        if self.entries.len() > self.capacity {
            let oldest = self.order.pop_front()?;
            let value = self.entries.remove(&oldest)?;
            return Some((oldest, value));
        }
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let value = self.entries.remove(key)?;
        if let Some(position) = self
            .order
            .iter()
            .position(|k| <K as Borrow<Q>>::borrow(k) == key)
        {
            self.order.remove(position);
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates entries from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.order
            .iter()
            .filter_map(|key| self.entries.get_key_value(key))
    }

    /// Clones every entry, least recently used first.
    pub fn entries(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn touch<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(position) = self
            .order
            .iter()
            .position(|k| <K as Borrow<Q>>::borrow(k) == key)
        {
            if let Some(k) = self.order.remove(position) {
                self.order.push_back(k);
            }
        }
    }
}

impl<K, V> Default for LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(cache: &LruCache<String, u32>) -> Vec<String> {
        cache.iter().map(|(k, _)| k.clone()).collect()
    }

    #[test]
    fn test_basic_operations() {
        let mut cache: LruCache<String, u32> = LruCache::new(3);
        assert!(cache.is_empty());

        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);
        assert_eq!(keys(&cache), vec!["b"]);
    }

    #[test]
    fn test_overflow_evicts_least_recently_touched() {
        let mut cache: LruCache<String, u32> = LruCache::new(3);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("c".to_string(), 3);

        // Touch "a" so "b" becomes the oldest
        cache.get("a");
        let evicted = cache.insert("d".to_string(), 4);

        assert_eq!(evicted, Some(("b".to_string(), 2)));
        assert_eq!(keys(&cache), vec!["c", "a", "d"]);
        assert_eq!(cache.len(), cache.capacity());
    }

    #[test]
    fn test_replacing_moves_to_back() {
        let mut cache: LruCache<String, u32> = LruCache::new(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert!(cache.insert("a".to_string(), 10).is_none());

        assert_eq!(keys(&cache), vec!["b", "a"]);
        assert_eq!(cache.peek("a"), Some(&10));
    }

    #[test]
    fn test_peek_does_not_touch() {
        let mut cache: LruCache<String, u32> = LruCache::new(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.peek("a");
        cache.insert("c".to_string(), 3);

        assert!(cache.peek("a").is_none());
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut cache: LruCache<String, u32> = LruCache::new(2);
        cache.insert("a".to_string(), 1);
        if let Some(value) = cache.get_mut("a") {
            *value += 1;
        }
        assert_eq!(cache.peek("a"), Some(&2));
    }

    #[test]
    fn test_zero_capacity_holds_nothing() {
        let mut cache: LruCache<String, u32> = LruCache::new(0);
        let evicted = cache.insert("a".to_string(), 1);
        assert_eq!(evicted, Some(("a".to_string(), 1)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut cache: LruCache<String, u32> = LruCache::default();
        for i in 0..100 {
            cache.insert(format!("action-{i}"), i);
            assert!(cache.len() <= DEFAULT_CACHE_CAPACITY);
        }
        assert_eq!(cache.entries().first().map(|(k, _)| k.as_str()), Some("action-90"));
    }
}
