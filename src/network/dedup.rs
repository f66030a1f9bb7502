//! Reply cache backing at-most-once semantics
//!
//! Keyed by `"ip:port#requestId"`. The cache stores the exact encoded
//! reply bytes, not the decoded message, so a replay is bit-identical to
//! the original reply; recomputing the reply could surface a different
//! balance if other clients mutated the account in between.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

struct DedupEntry {
    reply: Vec<u8>,
    expires_at: Instant,
}

/// TTL-bounded map from request identity to cached reply bytes.
///
/// Mutated only by the single server loop; expired entries are swept once
/// per loop iteration and additionally ignored on lookup, so a stale entry
/// can never be replayed even before the next sweep.
pub struct DedupCache {
    ttl: Duration,
    entries: HashMap<String, DedupEntry>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        DedupCache {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// The dedup key for a request: client endpoint plus request id.
    pub fn key(peer: SocketAddr, request_id: u64) -> String {
        format!("{peer}#{request_id}")
    }

    /// Look up an unexpired cached reply.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.reply.as_slice())
    }

    /// Cache the encoded reply for one request.
    pub fn insert(&mut self, key: String, reply: Vec<u8>) {
        self.entries.insert(
            key,
            DedupEntry {
                reply,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop entries past their expiry.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn replays_the_exact_cached_bytes() {
        let mut cache = DedupCache::new(Duration::from_secs(60));
        let key = DedupCache::key(peer(), 42);
        cache.insert(key.clone(), vec![1, 2, 3]);
        assert_eq!(cache.get(&key), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn keys_separate_endpoints_and_request_ids() {
        let other: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        assert_ne!(DedupCache::key(peer(), 1), DedupCache::key(other, 1));
        assert_ne!(DedupCache::key(peer(), 1), DedupCache::key(peer(), 2));
        assert_eq!(DedupCache::key(peer(), 7), "127.0.0.1:4000#7");
    }

    #[test]
    fn expired_entry_is_invisible_before_the_sweep() {
        let mut cache = DedupCache::new(Duration::from_millis(30));
        let key = DedupCache::key(peer(), 1);
        cache.insert(key.clone(), vec![9]);
        assert!(cache.get(&key).is_some());

        sleep(Duration::from_millis(60));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 1, "entry lingers until swept");
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let mut cache = DedupCache::new(Duration::from_millis(30));
        cache.insert(DedupCache::key(peer(), 1), vec![1]);
        sleep(Duration::from_millis(60));

        let fresh = DedupCache::key(peer(), 2);
        cache.insert(fresh.clone(), vec![2]);

        cache.sweep();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fresh).is_some());
    }

    #[test]
    fn reinsert_after_expiry_starts_a_new_window() {
        let mut cache = DedupCache::new(Duration::from_millis(30));
        let key = DedupCache::key(peer(), 1);
        cache.insert(key.clone(), vec![1]);
        sleep(Duration::from_millis(60));
        cache.sweep();
        assert!(cache.is_empty());

        cache.insert(key.clone(), vec![2]);
        assert_eq!(cache.get(&key), Some(&[2u8][..]));
    }
}
