//! Fixed window counter.
//!
//! Each identity counts admissions in a window that starts at its first
//! request and restarts once more than `window_size` has elapsed. The reset is
//! evaluated at decision time; there is no timer.
//!
//! Windows are anchored per identity rather than to wall-clock boundaries, so
//! a burst straddling a reset can still see up to twice `max_count`
//! admissions in a short span. That is inherent to fixed windows; use the
//! sliding window log when it matters.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace, warn};

use super::backend::{Decision, IdentityStats, RateLimiter, RejectReason, Snapshot};
use super::table::{IdentityState, IdentityTable};
use crate::config::RateConfig;
use crate::error::{RatekeeperError, Result};

/// Configuration for [`FixedWindowLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowConfig {
    /// Maximum requests admitted per window
    pub max_count: u64,
    /// Length of a window
    pub window_size: Duration,
}

impl FixedWindowConfig {
    pub const MAX_COUNT_KEY: &'static str = "max_request_count";
    pub const WINDOW_SIZE_KEY: &'static str = "window_size";

    pub fn new(max_count: u64, window_size: Duration) -> Result<Self> {
        if window_size.is_zero() {
            return Err(RatekeeperError::invalid(
                Self::WINDOW_SIZE_KEY,
                "0s",
                "window size must be greater than zero",
            ));
        }
        Ok(Self {
            max_count,
            window_size,
        })
    }

    pub fn from_rate_config(config: &RateConfig) -> Result<Self> {
        let window_size = config.require_duration(Self::WINDOW_SIZE_KEY)?;
        let max_count = config.require_u64(Self::MAX_COUNT_KEY)?;
        Self::new(max_count, window_size)
    }
}

/// A counter that tracks one identity's requests within its current window.
#[derive(Debug)]
struct Window {
    count: u64,
    max_count: u64,
    window_size: Duration,
    window_start: Instant,
}

impl IdentityState for Window {}

impl Window {
    fn new(config: &FixedWindowConfig, now: Instant) -> Self {
        Self {
            count: 0,
            max_count: config.max_count,
            window_size: config.window_size,
            window_start: now,
        }
    }

    /// Reset the window if it has expired.
    fn maybe_reset(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) > self.window_size {
            self.count = 0;
            self.window_start = now;
        }
    }

    /// Count the request if the window still has room.
    fn try_increment(&mut self, now: Instant) -> bool {
        self.maybe_reset(now);
        if self.count >= self.max_count {
            return false;
        }
        self.count += 1;
        true
    }

    /// Count as a decision made at `now` would see it.
    fn current_count(&self, now: Instant) -> u64 {
        if now.saturating_duration_since(self.window_start) > self.window_size {
            0
        } else {
            self.count
        }
    }
}

/// Per-identity fixed window counter limiter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    config: FixedWindowConfig,
    windows: IdentityTable<Window>,
}

impl FixedWindowLimiter {
    pub fn new(config: FixedWindowConfig) -> Self {
        info!(
            max_count = config.max_count,
            window_size = ?config.window_size,
            "Creating fixed window limiter"
        );
        Self {
            config,
            windows: IdentityTable::new(),
        }
    }

    pub fn config(&self) -> &FixedWindowConfig {
        &self.config
    }

    /// Number of identities currently tracked.
    pub fn identity_count(&self) -> usize {
        self.windows.len()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn decide(&self, identity: &str) -> Decision {
        let Some(cell) = self
            .windows
            .get_or_create(identity, || Window::new(&self.config, Instant::now()))
        else {
            warn!(identity = %identity, "Decision requested after shutdown");
            return Decision::Reject(RejectReason::Stopped);
        };

        let mut window = cell.lock();
        let decision = if window.try_increment(Instant::now()) {
            Decision::Admit
        } else {
            Decision::Reject(RejectReason::WindowFull)
        };

        trace!(
            identity = %identity,
            count = window.count,
            decision = ?decision,
            "Fixed window decision"
        );
        decision
    }

    fn forget(&self, identity: &str) {
        self.windows.remove(identity);
    }

    fn shutdown(&self) {
        if let Some(released) = self.windows.close() {
            info!(released, "Fixed window limiter shut down");
        }
    }

    fn limit(&self) -> u64 {
        self.config.max_count
    }

    fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let mut snapshot = Snapshot::new(self.name(), self.limit());
        snapshot
            .identities
            .extend(self.windows.collect(|window| IdentityStats::FixedWindow {
                count: window.current_count(now),
                capacity: window.max_count,
                window_ms: window.window_size.as_millis() as u64,
            }));
        snapshot
    }

    fn name(&self) -> &'static str {
        "fixed_window_counter"
    }
}
