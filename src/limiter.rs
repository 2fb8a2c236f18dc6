//! Per-key token bucket registry for admission control.
//!
//! # Algorithm
//!
//! Each admission key owns one token bucket. Tokens accrue continuously at
//! `rate_per_second` since the last refill and are capped at `burst`. A call
//! is admitted iff at least one whole token is available, which it consumes;
//! a rejected call consumes nothing. A rate of zero never refills, so the
//! bucket admits exactly `burst` calls over its lifetime.
//!
//! # Concurrency
//!
//! Buckets live in a [`DashMap`]. Get-or-create goes through
//! `entry().or_insert_with()`, which holds the shard write lock for the
//! duration of the insert, so concurrent first callers for a key all end up
//! with the same bucket. The shard lock is released before the bucket's own
//! lock is taken.
//!
//! # Eviction
//!
//! The registry is bounded by a periodic sweep. [`EvictionPolicy::Full`]
//! drops every bucket on each sweep, resetting busy clients to a full burst.
//! [`EvictionPolicy::Idle`] drops only buckets untouched for at least the TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

/// Default interval between eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Refill rate and capacity of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateConfig {
    /// Sustained tokens per second. Zero disables refill.
    pub rate_per_second: f64,
    /// Bucket capacity; also the number of tokens a new bucket starts with.
    pub burst: u32,
}

impl RateConfig {
    pub const fn new(rate_per_second: f64, burst: u32) -> Self {
        Self {
            rate_per_second,
            burst,
        }
    }
}

/// Default rate plus per-operation overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub default: RateConfig,
    /// Keyed by operation identifier, e.g. `POST:/tokens`.
    pub operations: HashMap<String, RateConfig>,
}

impl RateLimitConfig {
    pub fn new(default: RateConfig) -> Self {
        Self {
            default,
            operations: HashMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>, config: RateConfig) -> Self {
        self.operations.insert(operation.into(), config);
        self
    }

    /// Effective configuration for an operation.
    pub fn for_operation(&self, operation: &str) -> &RateConfig {
        self.operations.get(operation).unwrap_or(&self.default)
    }
}

/// How the sweep bounds the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Clear the whole registry on every sweep.
    #[default]
    Full,
    /// Remove buckets not seen for at least the given duration.
    Idle(Duration),
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// `retry_after` is `None` when the bucket never refills.
    Rejected { retry_after: Option<Duration> },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// A single token bucket.
#[derive(Debug)]
pub struct RateBucket {
    config: RateConfig,
    state: Mutex<BucketState>,
}

impl RateBucket {
    pub fn new(config: RateConfig, now: Instant) -> Self {
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: f64::from(config.burst),
                last_refill: now,
                last_seen: now,
            }),
        }
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    /// Refill up to `now`, then try to take one token.
    pub fn try_acquire(&self, now: Instant) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let rate = self.config.rate_per_second;
        let capacity = f64::from(self.config.burst);

        if rate > 0.0 {
            let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * rate).min(capacity);
        }
        state.last_refill = now;
        state.last_seen = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Admission::Admitted;
        }

        let retry_after = if rate > 0.0 {
            Duration::try_from_secs_f64((1.0 - state.tokens) / rate).ok()
        } else {
            None
        };
        Admission::Rejected { retry_after }
    }

    /// Whole tokens currently available, without refilling.
    pub fn available(&self) -> u32 {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // tokens is clamped to [0, burst]
        state.tokens.floor() as u32
    }

    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(state.last_seen) >= ttl
    }
}

/// Shortest sweep period; `tokio::time::interval` rejects zero.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Concurrent registry of buckets keyed by admission key.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<String, Arc<RateBucket>>,
    eviction: EvictionPolicy,
}

impl RateLimiterRegistry {
    pub fn new(eviction: EvictionPolicy) -> Self {
        Self {
            buckets: DashMap::new(),
            eviction,
        }
    }

    pub fn eviction(&self) -> EvictionPolicy {
        self.eviction
    }

    /// Admit or reject one call for `key`.
    pub fn allow(&self, key: &str, config: &RateConfig) -> bool {
        self.check(key, config).is_admitted()
    }

    /// Like [`allow`](Self::allow) but reports when to retry.
    pub fn check(&self, key: &str, config: &RateConfig) -> Admission {
        let now = Instant::now();
        self.bucket(key, config, now).try_acquire(now)
    }

    /// Get or atomically create the bucket for `key`.
    ///
    /// The config only matters for creation; an existing bucket keeps its own.
    fn bucket(&self, key: &str, config: &RateConfig, now: Instant) -> Arc<RateBucket> {
        if let Some(existing) = self.buckets.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                trace!(key, "Creating rate bucket");
                Arc::new(RateBucket::new(*config, now))
            });
        Arc::clone(entry.value())
    }

    /// Bucket for `key`, if one exists.
    pub fn get(&self, key: &str) -> Option<Arc<RateBucket>> {
        self.buckets.get(key).map(|b| Arc::clone(b.value()))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Apply the eviction policy once. Returns the number of buckets removed.
    ///
    /// Safe to run alongside [`check`](Self::check): each removal is atomic
    /// per shard, and a caller holding an evicted bucket finishes against it.
    pub fn sweep(&self) -> usize {
        let removed = match self.eviction {
            EvictionPolicy::Full => {
                let mut removed = 0;
                self.buckets.retain(|_, _| {
                    removed += 1;
                    false
                });
                removed
            }
            EvictionPolicy::Idle(ttl) => {
                let now = Instant::now();
                let mut removed = 0;
                self.buckets.retain(|_, bucket| {
                    let idle = bucket.is_idle(now, ttl);
                    if idle {
                        removed += 1;
                    }
                    !idle
                });
                removed
            }
        };
        crate::metrics::record_buckets_evicted(removed);
        removed
    }

    /// Spawn the periodic sweep on `tracker`, stopping when `cancel` fires.
    ///
    /// A zero period is raised to [`MIN_SWEEP_INTERVAL`].
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) {
        let every = if every.is_zero() {
            warn!(?MIN_SWEEP_INTERVAL, "Zero sweep interval requested, using the minimum");
            MIN_SWEEP_INTERVAL
        } else {
            every
        };
        let registry = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = registry.sweep();
                        debug!(removed, remaining = registry.len(), "Rate limit sweep completed");
                    }
                }
            }
        });
    }
}
