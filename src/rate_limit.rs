//! Per-provider rate limiting
//!
//! A token bucket per provider: capacity `C` refills continuously at `C / W`.
//! Decisions are synchronous and do no I/O, so a single mutex over all
//! buckets is enough to gate many concurrent requests.

use crate::config::{Config, RateLimitConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Bucket {
    capacity: f64,
    window: Duration,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(limit: RateLimitConfig, now: Instant) -> Self {
        let capacity = f64::from(limit.capacity);
        Self {
            capacity,
            window: Duration::from_secs(limit.window_secs),
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Tokens available at `now`, without writing anything back
    fn refilled(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.refilled_after(elapsed)
    }

    fn refilled_after(&self, elapsed: Duration) -> f64 {
        let rate = self.capacity / self.window.as_secs_f64();
        (self.tokens + elapsed.as_secs_f64() * rate).min(self.capacity)
    }
}

/// Persisted form of one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub provider: String,
    pub tokens: f64,
    pub updated_at: DateTime<Utc>,
}

/// Process-wide token bucket limiter keyed by provider name
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter with a full bucket for every configured provider
    pub fn from_config(config: &Config) -> Self {
        let limiter = Self::new();
        for provider in &config.providers {
            limiter.register(&provider.name, provider.rate_limit);
        }
        limiter
    }

    /// Add (or reset) a provider's bucket, starting full
    pub fn register(&self, provider: &str, limit: RateLimitConfig) {
        debug!(
            "⏱️ Rate limit for {}: {} per {}s",
            provider, limit.capacity, limit.window_secs
        );
        self.lock()
            .insert(provider.to_string(), Bucket::new(limit, Instant::now()));
    }

    /// Take one token if available. Unknown providers are always denied.
    pub fn try_acquire(&self, provider: &str) -> bool {
        self.try_acquire_at(provider, Instant::now())
    }

    /// [`try_acquire`](Self::try_acquire) with an explicit clock.
    ///
    /// State is only written when a token is taken; a denied call leaves the
    /// bucket exactly as it was.
    pub fn try_acquire_at(&self, provider: &str, now: Instant) -> bool {
        let mut buckets = self.lock();
        let Some(bucket) = buckets.get_mut(provider) else {
            debug!("Rate limiter has no bucket for '{}'", provider);
            return false;
        };

        let available = bucket.refilled(now);
        if available >= 1.0 {
            bucket.tokens = available - 1.0;
            bucket.last_refill = now.max(bucket.last_refill);
            true
        } else {
            debug!("⏳ {} rate limited ({:.2} tokens)", provider, available);
            false
        }
    }

    /// Tokens currently available, if the provider is known
    pub fn available(&self, provider: &str) -> Option<f64> {
        self.available_at(provider, Instant::now())
    }

    pub fn available_at(&self, provider: &str, now: Instant) -> Option<f64> {
        self.lock().get(provider).map(|b| b.refilled(now))
    }

    /// Current state of every bucket, stamped with wall-clock time
    pub fn snapshot(&self) -> Vec<RateLimitSnapshot> {
        let now = Instant::now();
        let updated_at = Utc::now();
        let mut snapshots: Vec<RateLimitSnapshot> = self
            .lock()
            .iter()
            .map(|(provider, bucket)| RateLimitSnapshot {
                provider: provider.clone(),
                tokens: bucket.refilled(now),
                updated_at,
            })
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    /// Apply persisted buckets to already registered providers.
    ///
    /// Refill continues for the wall-clock time since the snapshot was
    /// taken; a snapshot from the future refills nothing. Snapshots for
    /// providers no longer configured are ignored.
    pub fn restore(&self, snapshots: &[RateLimitSnapshot]) {
        let now = Instant::now();
        let wall_now = Utc::now();
        let mut buckets = self.lock();
        let mut restored = 0;

        for snapshot in snapshots {
            let Some(bucket) = buckets.get_mut(&snapshot.provider) else {
                continue;
            };
            let elapsed = (wall_now - snapshot.updated_at)
                .to_std()
                .unwrap_or(Duration::ZERO);

            bucket.tokens = snapshot.tokens.clamp(0.0, bucket.capacity);
            bucket.tokens = bucket.refilled_after(elapsed);
            bucket.last_refill = now;
            restored += 1;
        }

        if restored > 0 {
            info!("⏱️ Restored {} rate limit buckets", restored);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        // Buckets hold plain numbers; a panic elsewhere cannot leave them torn
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, window_secs: u64) -> RateLimiter {
        let limiter = RateLimiter::new();
        limiter.register(
            "a",
            RateLimitConfig {
                capacity,
                window_secs,
            },
        );
        limiter
    }

    #[test]
    fn test_capacity_then_blocked() {
        let limiter = limiter(3, 60);
        let t0 = Instant::now();

        assert!(limiter.try_acquire_at("a", t0));
        assert!(limiter.try_acquire_at("a", t0));
        assert!(limiter.try_acquire_at("a", t0));
        assert!(!limiter.try_acquire_at("a", t0));
    }

    #[test]
    fn test_half_window_refills_proportionally() {
        let limiter = limiter(3, 60);
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(limiter.try_acquire_at("a", t0));
        }
        assert!(!limiter.try_acquire_at("a", t0));

        let t30 = t0 + Duration::from_secs(30);
        let available = limiter.available_at("a", t30).unwrap();
        assert!((available - 1.5).abs() < 1e-9, "got {}", available);
        assert!(limiter.try_acquire_at("a", t30));
    }

    #[test]
    fn test_full_window_restores_capacity() {
        let limiter = limiter(5, 10);
        let t0 = Instant::now();
        for _ in 0..5 {
            assert!(limiter.try_acquire_at("a", t0));
        }
        assert!(!limiter.try_acquire_at("a", t0));

        let t_full = t0 + Duration::from_secs(10);
        assert_eq!(limiter.available_at("a", t_full), Some(5.0));
        for _ in 0..5 {
            assert!(limiter.try_acquire_at("a", t_full));
        }
        assert!(!limiter.try_acquire_at("a", t_full));
    }

    #[test]
    fn test_refill_is_capped() {
        let limiter = limiter(2, 1);
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(limiter.available_at("a", later), Some(2.0));
    }

    #[test]
    fn test_blocked_attempt_does_not_mutate() {
        let limiter = limiter(1, 60);
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at("a", t0));

        let t10 = t0 + Duration::from_secs(10);
        let before = limiter.available_at("a", t10);
        assert!(!limiter.try_acquire_at("a", t10));
        assert!(!limiter.try_acquire_at("a", t10));
        assert_eq!(limiter.available_at("a", t10), before);

        // Refill keeps accruing from the last permitted call
        assert!(limiter.try_acquire_at("a", t0 + Duration::from_secs(61)));
    }

    #[test]
    fn test_unknown_provider_denied() {
        let limiter = limiter(3, 60);
        assert!(!limiter.try_acquire("missing"));
        assert_eq!(limiter.available("missing"), None);
    }

    #[test]
    fn test_concurrent_acquires_never_oversubscribe() {
        let limiter = std::sync::Arc::new(limiter(50, 3600));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.try_acquire("a")).count())
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // A handful of tokens may trickle back in while the threads run
        assert!((50..=51).contains(&granted), "granted {}", granted);
    }

    #[test]
    fn test_snapshot_restore_keeps_usage() {
        let original = limiter(3, 3600);
        for _ in 0..3 {
            assert!(original.try_acquire("a"));
        }
        let snapshot = original.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].tokens < 0.1);

        let restarted = limiter(3, 3600);
        restarted.restore(&snapshot);
        assert!(!restarted.try_acquire("a"));
    }

    #[test]
    fn test_restore_refills_for_elapsed_wall_time() {
        let restarted = limiter(4, 60);
        restarted.restore(&[RateLimitSnapshot {
            provider: "a".to_string(),
            tokens: 0.0,
            updated_at: Utc::now() - chrono::Duration::seconds(30),
        }]);
        let available = restarted.available("a").unwrap();
        assert!((2.0..2.5).contains(&available), "got {}", available);
    }

    #[test]
    fn test_restore_ignores_unknown_and_clamps() {
        let restarted = limiter(2, 60);
        restarted.restore(&[
            RateLimitSnapshot {
                provider: "gone".to_string(),
                tokens: 1.0,
                updated_at: Utc::now(),
            },
            RateLimitSnapshot {
                provider: "a".to_string(),
                tokens: 99.0,
                updated_at: Utc::now() + chrono::Duration::seconds(600),
            },
        ]);
        assert_eq!(restarted.available("gone"), None);
        let available = restarted.available("a").unwrap();
        assert!((2.0 - available).abs() < 1e-6);
    }
}
