//! Token bucket with lazy, time-proportional refill.
//!
//! No background work is involved: each decision first credits whatever the
//! elapsed time has earned, then tries to take a token, all under the
//! identity's lock.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace, warn};

use super::backend::{Decision, IdentityStats, RateLimiter, RejectReason, Snapshot};
use super::table::{IdentityState, IdentityTable};
use crate::config::RateConfig;
use crate::error::{RatekeeperError, Result};

/// Configuration for [`TokenBucketLimiter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketConfig {
    /// Maximum burst size; buckets start full
    pub capacity: u64,
    /// Tokens credited per second
    pub refill_rate: f64,
}

impl TokenBucketConfig {
    pub const CAPACITY_KEY: &'static str = "capacity";
    pub const REFILL_RATE_KEY: &'static str = "refill_rate";

    /// Validate a configuration. `refill_rate` must be positive and finite.
    pub fn new(capacity: u64, refill_rate: f64) -> Result<Self> {
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(RatekeeperError::invalid(
                Self::REFILL_RATE_KEY,
                &refill_rate.to_string(),
                "refill rate must be greater than zero",
            ));
        }
        Ok(Self {
            capacity,
            refill_rate,
        })
    }

    /// Parse `capacity` and `refill_rate` from a flat configuration.
    pub fn from_rate_config(config: &RateConfig) -> Result<Self> {
        let capacity = config.require_u64(Self::CAPACITY_KEY)?;
        let refill_rate = config.require_f64(Self::REFILL_RATE_KEY)?;
        Self::new(capacity, refill_rate)
    }
}

/// One identity's bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: u64,
    capacity: u64,
    refill_rate: f64,
    /// Point up to which elapsed time has been converted into tokens
    last_refill: Instant,
}

impl IdentityState for TokenBucket {}

impl TokenBucket {
    fn new(config: &TokenBucketConfig, now: Instant) -> Self {
        Self {
            tokens: config.capacity,
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            last_refill: now,
        }
    }

    /// Tokens and refill mark the bucket would have at `now`, without
    /// changing it.
    fn projected(&self, now: Instant) -> (u64, Instant) {
        if self.tokens >= self.capacity {
            return (self.capacity, now);
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = (elapsed.as_secs_f64() * self.refill_rate).floor();
        if earned < 1.0 {
            return (self.tokens, self.last_refill);
        }

        let tokens = self.tokens.saturating_add(earned as u64).min(self.capacity);
        if tokens == self.capacity {
            return (tokens, now);
        }

        // Keep the fractional remainder for the next decision.
        let spent = Duration::from_secs_f64(earned / self.refill_rate);
        let mark = (self.last_refill + spent).min(now);
        (tokens, mark)
    }

    fn refill(&mut self, now: Instant) {
        let (tokens, mark) = self.projected(now);
        self.tokens = tokens;
        self.last_refill = mark;
    }

    fn try_take(&mut self) -> bool {
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    fn stats(&self, now: Instant) -> IdentityStats {
        let (available, _) = self.projected(now);
        IdentityStats::TokenBucket {
            tokens: self.tokens,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            available,
            since_refill_secs: now.saturating_duration_since(self.last_refill).as_secs_f64(),
        }
    }
}

/// Per-identity token bucket limiter using lazy refill.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    buckets: IdentityTable<TokenBucket>,
}

impl TokenBucketLimiter {
    pub fn new(config: TokenBucketConfig) -> Self {
        info!(
            capacity = config.capacity,
            refill_rate = config.refill_rate,
            "Creating token bucket limiter"
        );
        Self {
            config,
            buckets: IdentityTable::new(),
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Number of identities currently tracked.
    pub fn identity_count(&self) -> usize {
        self.buckets.len()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn decide(&self, identity: &str) -> Decision {
        let cell = self
            .buckets
            .get_or_create(identity, || TokenBucket::new(&self.config, Instant::now()));

        let Some(cell) = cell else {
            warn!(identity = %identity, "Decision requested after shutdown");
            return Decision::Reject(RejectReason::Stopped);
        };

        let mut bucket = cell.lock();
        bucket.refill(Instant::now());
        let decision = if bucket.try_take() {
            Decision::Admit
        } else {
            Decision::Reject(RejectReason::BucketEmpty)
        };

        trace!(
            identity = %identity,
            tokens = bucket.tokens,
            decision = ?decision,
            "Token bucket decision"
        );
        decision
    }

    fn forget(&self, identity: &str) {
        self.buckets.remove(identity);
    }

    fn shutdown(&self) {
        if let Some(released) = self.buckets.close() {
            info!(released, "Token bucket limiter shut down");
        }
    }

    fn limit(&self) -> u64 {
        self.config.capacity
    }

    fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let mut snapshot = Snapshot::new(self.name(), self.limit());
        snapshot
            .identities
            .extend(self.buckets.collect(|bucket| bucket.stats(now)));
        snapshot
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}
