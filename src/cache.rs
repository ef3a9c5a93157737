//! Response cache
//!
//! Recent explanations keyed by a hash of the normalized selection, with a
//! TTL and a capacity cap. Repeated or rapidly re-triggered selections are
//! answered from here without another outbound call.

use crate::core::{ExplanationResult, TextNormalizer};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Derive the cache key for a selection.
///
/// Text and context are normalized first, so whitespace and case
/// differences in the same selection share an entry. `provider` is the
/// caller's preferred provider, if any.
pub fn cache_key(text: &str, context: &str, provider: Option<&str>) -> String {
    let normalizer = TextNormalizer::new();
    let mut hasher = Sha256::new();
    hasher.update(normalizer.canonical(text).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalizer.canonical(context).as_bytes());
    hasher.update([0u8]);
    hasher.update(provider.unwrap_or("").as_bytes());

    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// One cached explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub result: ExplanationResult,
    pub created_at: DateTime<Utc>,
}

/// Counters for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// TTL cache with oldest-first eviction past `max_entries`
#[derive(Debug)]
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: std::time::Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<ExplanationResult> {
        self.get_at(key, Utc::now())
    }

    /// Lookup with an explicit clock. Expired entries are dropped.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<ExplanationResult> {
        let mut inner = self.lock();

        let fresh = match inner.entries.get(key) {
            Some(entry) if self.is_fresh(entry, now) => Some(entry.result.clone()),
            Some(_) => {
                inner.entries.remove(key);
                debug!("🗑️ Cache entry expired");
                None
            }
            None => None,
        };

        if fresh.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        fresh
    }

    pub fn put(&self, key: String, result: ExplanationResult) {
        self.put_at(key, result, Utc::now());
    }

    /// Insert with an explicit clock, evicting the oldest entries if full
    pub fn put_at(&self, key: String, result: ExplanationResult, now: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                result,
                created_at: now,
            },
        );
        self.evict_overflow(&mut inner, now);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats.clone()
        }
    }

    /// Live entries, oldest first
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let now = Utc::now();
        let inner = self.lock();
        let mut entries: Vec<CacheEntry> = inner
            .entries
            .values()
            .filter(|e| self.is_fresh(e, now))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    /// Load persisted entries, keeping their original creation times
    pub fn restore(&self, entries: Vec<CacheEntry>) {
        let now = Utc::now();
        let mut inner = self.lock();
        for entry in entries {
            if self.is_fresh(&entry, now) {
                inner.entries.insert(entry.key.clone(), entry);
            }
        }
        self.evict_overflow(&mut inner, now);
        debug!("💾 Cache restored with {} entries", inner.entries.len());
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.created_at) < self.ttl
    }

    fn evict_overflow(&self, inner: &mut CacheInner, now: DateTime<Utc>) {
        if inner.entries.len() <= self.max_entries {
            return;
        }

        // Expired entries go first; they are already logically absent
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, e| now.signed_duration_since(e.created_at) < ttl);

        while inner.entries.len() > self.max_entries {
            let oldest = inner
                .entries
                .values()
                .min_by_key(|e| e.created_at)
                .map(|e| e.key.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                    inner.stats.evictions += 1;
                }
                None => break,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
