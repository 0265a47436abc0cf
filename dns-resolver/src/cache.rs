use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dns_types::protocol::types::RecordType;

/// How long a successful upstream response is cached for, regardless
/// of the TTLs of the records it contains.  Not configurable: see the
/// design notes on why a flat value was chosen over honouring
/// upstream TTLs.
pub const CACHE_TTL: Duration = Duration::from_secs(3600);

/// The key a cached response is stored and looked up under: the
/// question, plus which upstream answered it (two upstreams may give
/// different answers for the same question).
///
/// `qname` is always the normalized (lowercase, no trailing dot) form
/// of the question's domain name, so queries that differ only in case
/// share the same cache entry.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CacheKey {
    pub qname: String,
    pub qtype: RecordType,
    pub upstream: SocketAddr,
}

impl CacheKey {
    pub fn new(qname: String, qtype: RecordType, upstream: SocketAddr) -> Self {
        Self {
            qname,
            qtype,
            upstream,
        }
    }
}

/// A convenience wrapper around a `Cache` which lets it be shared
/// between threads.
///
/// Invoking `clone` on a `SharedCache` gives a new instance which
/// refers to the same underlying `Cache` object.
#[derive(Debug, Clone)]
pub struct SharedCache {
    cache: Arc<Mutex<Cache>>,
}

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] cache mutex poisoned, cannot recover from this - aborting";

impl SharedCache {
    /// Make a new, empty, shared cache.
    pub fn new() -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::new())),
        }
    }

    /// Create a new cache with the given desired size.
    pub fn with_desired_size(desired_size: usize) -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::with_desired_size(desired_size))),
        }
    }

    /// Look up a cached response's raw wire bytes.  Returns `None` if
    /// there is no entry, or the entry has expired.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).get(key)
    }

    /// Check whether a live (non-expired) entry exists for `key`,
    /// without affecting its LRU position.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).contains(key)
    }

    /// Insert a raw upstream response, keyed by `key`, with the fixed
    /// `CACHE_TTL`.  If this pushes the cache over its desired size,
    /// the least-recently-used entry is evicted immediately.
    pub fn insert(&self, key: CacheKey, response: Vec<u8>) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .insert(key, response);
    }

    /// Atomically clears expired entries and, if the cache has grown
    /// beyond its desired size, prunes entries to get down to size.
    ///
    /// Returns `(has overflowed?, current size, num expired, num pruned)`.
    pub fn cleanup(&self) -> (bool, usize, usize, usize) {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).cleanup()
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Caching for raw upstream responses, keyed by `CacheKey`.
///
/// You probably want to use `SharedCache` instead.
#[derive(Debug, Clone)]
struct Cache {
    /// Cached responses, indexed by key.
    entries: HashMap<CacheKey, CacheEntry>,

    /// Priority queue of keys ordered by access time.
    ///
    /// When the cache is full and there are no expired records to
    /// prune, entries are instead pruned in LRU order.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `entries`.
    access_priority: PriorityQueue<CacheKey, Reverse<Instant>>,

    /// Priority queue of keys ordered by expiry time.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `entries`.
    expiry_priority: PriorityQueue<CacheKey, Reverse<Instant>>,

    /// The desired maximum number of entries in the cache.
    desired_size: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: Vec<u8>,
    expires_at: Instant,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    /// Create a new cache with a default desired size.
    fn new() -> Self {
        Self::with_desired_size(512)
    }

    /// Create a new cache with the given desired size.
    ///
    /// Panics:
    ///
    /// - If called with a desired_size of 0.
    fn with_desired_size(desired_size: usize) -> Self {
        if desired_size == 0 {
            panic!("cannot create a zero-size cache");
        }

        Self {
            entries: HashMap::with_capacity(desired_size),
            access_priority: PriorityQueue::with_capacity(desired_size),
            expiry_priority: PriorityQueue::with_capacity(desired_size),
            desired_size,
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Vec<u8>> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;

        if entry.expires_at <= now {
            return None;
        }

        let response = entry.response.clone();
        self.access_priority.change_priority(key, Reverse(now));
        Some(response)
    }

    fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) => entry.expires_at > now,
            None => false,
        }
    }

    /// Insert an entry, evicting the least-recently-used entry
    /// immediately if this pushes the cache over its desired size.
    fn insert(&mut self, key: CacheKey, response: Vec<u8>) {
        let now = Instant::now();
        let expires_at = now + CACHE_TTL;

        if self.entries.contains_key(&key) {
            self.access_priority.change_priority(&key, Reverse(now));
            self.expiry_priority
                .change_priority(&key, Reverse(expires_at));
        } else {
            self.access_priority.push(key.clone(), Reverse(now));
            self.expiry_priority.push(key.clone(), Reverse(expires_at));
        }

        self.entries.insert(key, CacheEntry {
            response,
            expires_at,
        });

        self.remove_least_recently_used();
    }

    /// Delete all expired entries.  Returns the number removed.
    fn remove_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        while let Some((key, Reverse(expiry))) = self.expiry_priority.peek().map(|(k, p)| (k.clone(), *p)) {
            if expiry > now {
                break;
            }
            self.expiry_priority.pop();
            self.access_priority.remove(&key);
            self.entries.remove(&key);
            removed += 1;
        }

        removed
    }

    /// Delete enough least-recently-used entries to reduce the cache
    /// to the desired size.  Returns the number removed.
    fn remove_least_recently_used(&mut self) -> usize {
        let mut removed = 0;
        while self.entries.len() > self.desired_size {
            if let Some((key, _)) = self.access_priority.pop() {
                self.expiry_priority.remove(&key);
                self.entries.remove(&key);
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    fn cleanup(&mut self) -> (bool, usize, usize, usize) {
        let has_overflowed = self.entries.len() > self.desired_size;
        let num_expired = self.remove_expired();
        let num_pruned = self.remove_least_recently_used();
        (has_overflowed, self.entries.len(), num_expired, num_pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn key(name: &str) -> CacheKey {
        CacheKey::new(
            name.to_string(),
            RecordType::A,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53),
        )
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut cache = Cache::new();
        cache.insert(key("example.com"), vec![1, 2, 3]);
        assert_eq!(Some(vec![1, 2, 3]), cache.get(&key("example.com")));
    }

    #[test]
    fn get_on_missing_key_is_none() {
        let mut cache = Cache::new();
        assert_eq!(None, cache.get(&key("example.com")));
    }

    #[test]
    fn contains_does_not_touch_lru_order() {
        let mut cache = Cache::with_desired_size(2);
        cache.insert(key("a.example.com"), vec![1]);
        cache.insert(key("b.example.com"), vec![2]);

        assert!(cache.contains(&key("a.example.com")));
        assert!(cache.contains(&key("b.example.com")));
        assert!(!cache.contains(&key("c.example.com")));

        // "a" is still the least-recently-used entry, since `contains`
        // must not have bumped it: inserting "c" evicts "a", not "b".
        cache.insert(key("c.example.com"), vec![3]);
        assert!(!cache.contains(&key("a.example.com")));
        assert!(cache.contains(&key("b.example.com")));
        assert!(cache.contains(&key("c.example.com")));
    }

    #[test]
    fn insert_is_idempotent_in_size() {
        let mut cache = Cache::new();
        cache.insert(key("example.com"), vec![1]);
        cache.insert(key("example.com"), vec![2]);
        assert_eq!(1, cache.entries.len());
        assert_eq!(Some(vec![2]), cache.get(&key("example.com")));
    }

    #[test]
    fn insert_evicts_lru_entry_immediately_at_capacity() {
        let mut cache = Cache::with_desired_size(2);
        cache.insert(key("a.example.com"), vec![1]);
        cache.insert(key("b.example.com"), vec![2]);
        cache.insert(key("c.example.com"), vec![3]);

        // eviction happens on the insert that crosses capacity, not on
        // a later cleanup sweep.
        assert_eq!(2, cache.entries.len());
        assert_eq!(None, cache.get(&key("a.example.com")));
        assert_eq!(Some(vec![2]), cache.get(&key("b.example.com")));
        assert_eq!(Some(vec![3]), cache.get(&key("c.example.com")));
    }

    #[test]
    fn cleanup_prunes_to_desired_size() {
        let mut cache = Cache::with_desired_size(2);
        cache.insert(key("a.example.com"), vec![1]);
        cache.insert(key("b.example.com"), vec![2]);
        cache.insert(key("c.example.com"), vec![3]);

        // insert() already evicted down to the desired size, so
        // cleanup() has nothing left to prune.
        let (overflowed, current_size, expired, pruned) = cache.cleanup();
        assert!(!overflowed);
        assert_eq!(0, expired);
        assert_eq!(0, pruned);
        assert_eq!(2, current_size);
        assert_eq!(2, cache.entries.len());
    }
}
