//! Limiter trait shared by every algorithm engine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Limit reported by [`NoLimit`].
pub const UNBOUNDED_LIMIT: u64 = 1_000_000_000;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The identity's token bucket is empty
    BucketEmpty,
    /// The identity's current fixed window is full
    WindowFull,
    /// The identity's trailing log holds more than the allowed count
    LimitExceeded,
    /// The engine has been shut down
    Stopped,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::BucketEmpty => "bucket is empty",
            RejectReason::WindowFull => "window is full",
            RejectReason::LimitExceeded => "rate limit exceeded",
            RejectReason::Stopped => "limiter is stopped",
        };
        f.write_str(text)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Admit,
    Reject(RejectReason),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    pub fn is_reject(&self) -> bool {
        !self.is_admit()
    }
}

/// Per-identity counters captured by [`RateLimiter::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityStats {
    TokenBucket {
        /// Tokens left after the last decision
        tokens: u64,
        capacity: u64,
        refill_rate: f64,
        /// Tokens a decision made now would see before consuming
        available: u64,
        /// Seconds since refill progress was last recorded
        since_refill_secs: f64,
    },
    PushBucket {
        tokens: u64,
        capacity: u64,
        push_interval_ms: u64,
        /// Whether the identity's background pusher is still running
        pusher_active: bool,
    },
    FixedWindow {
        count: u64,
        capacity: u64,
        window_ms: u64,
    },
    SlidingLog {
        request_count: u64,
        capacity: u64,
        window_ms: u64,
    },
}

/// A point-in-time, read-only view of an engine.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub algorithm: &'static str,
    pub limit: u64,
    pub taken_at: DateTime<Utc>,
    pub identities: BTreeMap<String, IdentityStats>,
}

impl Snapshot {
    pub fn new(algorithm: &'static str, limit: u64) -> Self {
        Self {
            algorithm,
            limit,
            taken_at: Utc::now(),
            identities: BTreeMap::new(),
        }
    }
}

/// The capability set every limiting algorithm provides.
///
/// Implementations are shared across request-handling threads behind an
/// `Arc`, so every method takes `&self` and must be safe to call
/// concurrently for the same or different identities.
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Decide whether a request from `identity` is admitted.
    ///
    /// State for an unseen identity is created on the first call. After
    /// [`RateLimiter::shutdown`] every call returns
    /// `Decision::Reject(RejectReason::Stopped)`.
    fn decide(&self, identity: &str) -> Decision;

    /// Drop all state for `identity`, stopping any background work tied to it.
    ///
    /// Forgetting an unknown identity is a no-op.
    fn forget(&self, identity: &str);

    /// Release every identity and stop all background work. Idempotent.
    fn shutdown(&self);

    /// The configured maximum sustained admission count.
    fn limit(&self) -> u64;

    /// Copy the current per-identity counters without mutating them.
    fn snapshot(&self) -> Snapshot;

    /// Short, stable algorithm name used in logs and snapshots.
    fn name(&self) -> &'static str;
}

/// Fallback limiter that admits everything.
///
/// Used when no algorithm is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLimit;

impl RateLimiter for NoLimit {
    fn decide(&self, _identity: &str) -> Decision {
        Decision::Admit
    }

    fn forget(&self, _identity: &str) {}

    fn shutdown(&self) {}

    fn limit(&self) -> u64 {
        UNBOUNDED_LIMIT
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.name(), self.limit())
    }

    fn name(&self) -> &'static str {
        "no_limit"
    }
}
