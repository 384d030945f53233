//! Result cache
//!
//! In-memory memoization of reconciliation results and first-page listings.
//! Every entry carries an absolute time-to-live and a sliding window: it
//! expires at `ttl` after insertion no matter how often it is read, and
//! earlier if nobody reads it for `sliding`. The cache only accelerates;
//! callers must treat a miss as "go ask the providers".

use crate::plugin::source::{Category, Novel, Paged};
use crate::reconcile::matching::StrippedNovel;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Values the cache can hold
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Matches of one novel across providers, keyed by provider name
    Reconciliation(HashMap<String, StrippedNovel>),
    Listing(Paged<Novel>),
    Categories(Vec<Category>),
}

/// Key for a first-page listing: `listing:<operation>:<source>[:<param>]:page=1`
pub fn listing_key(operation: &str, source: &str, param: Option<&str>) -> String {
    match param {
        Some(param) => format!("listing:{}:{}:{}:page=1", operation, source, param),
        None => format!("listing:{}:{}:page=1", operation, source),
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: CacheValue,
    inserted_at: Instant,
    last_access: Instant,
    ttl: Duration,
    sliding: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        if now.duration_since(self.inserted_at) >= self.ttl {
            return true;
        }
        // a zero window disables sliding expiry
        !self.sliding.is_zero() && now.duration_since(self.last_access) >= self.sliding
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a live entry, refreshing its sliding window
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        let mut entries = self.lock();

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            debug!(key = %key, "Cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value; a zero `ttl` stores nothing
    pub fn set(&self, key: impl Into<String>, value: CacheValue, ttl: Duration, sliding: Duration) {
        if ttl.is_zero() {
            return;
        }

        let key = key.into();
        let now = Instant::now();
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| !entry.is_expired(now));
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    debug!(key = %oldest, "Evicting least recently used cache entry");
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_access: now,
                ttl,
                sliding: sliding.min(ttl),
            },
        );
    }

    /// Drop everything, returning how many entries were held
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
