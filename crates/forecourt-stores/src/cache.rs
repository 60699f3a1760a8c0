//! Result cache for approved insights.
//!
//! Capacity-bounded LRU with a TTL. Reads refresh recency; stale entries
//! are dropped lazily on lookup. All operations take one short lock, so
//! the cache is safe under concurrent lookups and stores.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use forecourt_core::fingerprint::Fingerprint;
use forecourt_core::types::InsightResponse;

struct CacheEntry {
    response: InsightResponse,
    stored_at: Instant,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Least-recently-used order, most recent at the back
    recency: VecDeque<String>,
}

/// LRU/TTL cache of delivered responses keyed by fingerprint.
pub struct InsightCache {
    state: Mutex<CacheState>,
    capacity: usize,
    ttl: Duration,
}

impl InsightCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Fetch a fresh entry, refreshing its recency. Expired entries are
    /// evicted on the way out.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<InsightResponse> {
        let key = fingerprint.as_str();
        let mut state = self.state.lock().expect("cache lock poisoned");

        let fresh = match state.entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() < self.ttl,
            None => return None,
        };
        if !fresh {
            state.entries.remove(key);
            state.recency.retain(|k| k != key);
            return None;
        }

        touch(&mut state.recency, key);
        state.entries.get(key).map(|e| e.response.clone())
    }

    /// Insert or replace an entry, evicting least-recently-used entries
    /// past capacity.
    pub fn store(&self, fingerprint: &Fingerprint, response: InsightResponse) {
        let key = fingerprint.as_str().to_string();
        let mut state = self.state.lock().expect("cache lock poisoned");

        state.entries.insert(
            key.clone(),
            CacheEntry {
                response,
                stored_at: Instant::now(),
            },
        );
        touch(&mut state.recency, &key);

        while state.entries.len() > self.capacity {
            let Some(oldest) = state.recency.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
        }
    }

    pub fn evict(&self, fingerprint: &Fingerprint) {
        let key = fingerprint.as_str();
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.entries.remove(key);
        state.recency.retain(|k| k != key);
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn touch(recency: &mut VecDeque<String>, key: &str) {
    recency.retain(|k| k != key);
    recency.push_back(key.to_string());
}
