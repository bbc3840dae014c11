//! Sliding window log.
//!
//! Keeps the timestamp of every request seen in the trailing window, so the
//! count is exact at any instant at the cost of memory proportional to the
//! traffic in one window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace, warn};

use super::backend::{Decision, IdentityStats, RateLimiter, RejectReason, Snapshot};
use super::table::{IdentityState, IdentityTable};
use crate::config::RateConfig;
use crate::error::{RatekeeperError, Result};

/// Configuration for [`SlidingLogLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingLogConfig {
    pub requests_per_sec: u64,
    pub window_size: Duration,
}

impl SlidingLogConfig {
    pub const REQUESTS_PER_SEC_KEY: &'static str = "request_per_sec";
    pub const WINDOW_SIZE_KEY: &'static str = "window_size";

    pub fn new(requests_per_sec: u64, window_size: Duration) -> Result<Self> {
        if window_size.is_zero() {
            return Err(RatekeeperError::invalid(
                Self::WINDOW_SIZE_KEY,
                "0s",
                "window size must be greater than zero",
            ));
        }
        Ok(Self {
            requests_per_sec,
            window_size,
        })
    }

    pub fn from_rate_config(config: &RateConfig) -> Result<Self> {
        let requests_per_sec = config.require_u64(Self::REQUESTS_PER_SEC_KEY)?;
        let window_size = config.require_duration(Self::WINDOW_SIZE_KEY)?;
        Self::new(requests_per_sec, window_size)
    }

    /// Requests allowed in one window: `floor(requests_per_sec * seconds)`.
    ///
    /// Fractional window lengths count, so 3 req/s over 1.5s allows 4.
    pub fn max_count(&self) -> u64 {
        (self.requests_per_sec as f64 * self.window_size.as_secs_f64()).floor() as u64
    }
}

/// Time-ordered log of one identity's requests.
#[derive(Debug)]
struct RequestLog {
    entries: VecDeque<Instant>,
    max_count: u64,
    window_size: Duration,
}

impl IdentityState for RequestLog {}

impl RequestLog {
    fn new(config: &SlidingLogConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            max_count: config.max_count(),
            window_size: config.window_size,
        }
    }

    /// Drop entries that have aged out of the window ending at `now`.
    fn purge(&mut self, now: Instant) {
        while let Some(oldest) = self.entries.front() {
            if now.saturating_duration_since(*oldest) < self.window_size {
                break;
            }
            self.entries.pop_front();
        }
    }

    /// Record a request and report whether the window is within its limit.
    fn record(&mut self, now: Instant) -> bool {
        self.entries.push_back(now);
        self.purge(now);
        self.entries.len() as u64 <= self.max_count
    }

    fn live_count(&self, now: Instant) -> u64 {
        self.entries
            .iter()
            .rev()
            .take_while(|ts| now.saturating_duration_since(**ts) < self.window_size)
            .count() as u64
    }
}

/// Per-identity sliding window log limiter.
#[derive(Debug)]
pub struct SlidingLogLimiter {
    config: SlidingLogConfig,
    max_count: u64,
    logs: IdentityTable<RequestLog>,
}

impl SlidingLogLimiter {
    pub fn new(config: SlidingLogConfig) -> Self {
        let max_count = config.max_count();
        info!(
            requests_per_sec = config.requests_per_sec,
            window_size = ?config.window_size,
            max_count,
            "Creating sliding window log limiter"
        );
        Self {
            config,
            max_count,
            logs: IdentityTable::new(),
        }
    }

    pub fn config(&self) -> &SlidingLogConfig {
        &self.config
    }

    /// Number of identities currently tracked.
    pub fn identity_count(&self) -> usize {
        self.logs.len()
    }
}

impl RateLimiter for SlidingLogLimiter {
    /// Rejected requests are still logged: they are real traffic and count
    /// against the identity until they age out.
    fn decide(&self, identity: &str) -> Decision {
        let Some(cell) = self
            .logs
            .get_or_create(identity, || RequestLog::new(&self.config))
        else {
            warn!(identity = %identity, "Decision requested after shutdown");
            return Decision::Reject(RejectReason::Stopped);
        };

        let mut log = cell.lock();
        let decision = if log.record(Instant::now()) {
            Decision::Admit
        } else {
            Decision::Reject(RejectReason::LimitExceeded)
        };

        trace!(
            identity = %identity,
            logged = log.entries.len(),
            decision = ?decision,
            "Sliding log decision"
        );
        decision
    }

    fn forget(&self, identity: &str) {
        self.logs.remove(identity);
    }

    fn shutdown(&self) {
        if let Some(released) = self.logs.close() {
            info!(released, "Sliding window log limiter shut down");
        }
    }

    fn limit(&self) -> u64 {
        self.max_count
    }

    fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let mut snapshot = Snapshot::new(self.name(), self.limit());
        snapshot
            .identities
            .extend(self.logs.collect(|log| IdentityStats::SlidingLog {
                request_count: log.live_count(now),
                capacity: log.max_count,
                window_ms: log.window_size.as_millis() as u64,
            }));
        snapshot
    }

    fn name(&self) -> &'static str {
        "sliding_window_log"
    }
}
