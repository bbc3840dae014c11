//! Token bucket refilled by a per-identity background pusher.
//!
//! Each identity gets a tokio task, started when its bucket is created, that
//! adds one token every `token_push_interval`. Decisions only consume. The
//! pusher is stopped through a oneshot channel when the identity is forgotten
//! or the limiter shuts down, and it also exits once its bucket is dropped.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::backend::{Decision, IdentityStats, RateLimiter, RejectReason, Snapshot};
use super::table::{IdentityState, IdentityTable};
use crate::config::RateConfig;
use crate::error::{RatekeeperError, Result};

/// Configuration for [`PushBucketLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushBucketConfig {
    /// Maximum number of tokens in a bucket; buckets start full
    pub capacity: u64,
    /// Time between two pushed tokens
    pub push_interval: Duration,
}

impl PushBucketConfig {
    pub const CAPACITY_KEY: &'static str = "bucket_capacity";
    pub const PUSH_INTERVAL_KEY: &'static str = "token_push_interval";

    pub fn new(capacity: u64, push_interval: Duration) -> Result<Self> {
        if push_interval.is_zero() {
            return Err(RatekeeperError::invalid(
                Self::PUSH_INTERVAL_KEY,
                "0s",
                "push interval must be greater than zero",
            ));
        }
        Ok(Self {
            capacity,
            push_interval,
        })
    }

    pub fn from_rate_config(config: &RateConfig) -> Result<Self> {
        let capacity = config.require_u64(Self::CAPACITY_KEY)?;
        let push_interval = config.require_duration(Self::PUSH_INTERVAL_KEY)?;
        Self::new(capacity, push_interval)
    }
}

#[derive(Debug)]
struct PushBucket {
    tokens: u64,
    capacity: u64,
    stop: Option<oneshot::Sender<()>>,
    pusher: Option<JoinHandle<()>>,
}

impl PushBucket {
    fn new(capacity: u64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            stop: None,
            pusher: None,
        }
    }

    fn push(&mut self) -> bool {
        if self.tokens >= self.capacity {
            return false;
        }
        self.tokens += 1;
        true
    }

    fn try_take(&mut self) -> bool {
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }
}

impl IdentityState for PushBucket {
    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            // The pusher may already be gone; either way it will not tick again.
            let _ = stop.send(());
        }
    }
}

async fn push_tokens(
    identity: String,
    bucket: Weak<Mutex<PushBucket>>,
    started: Instant,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    debug!(identity = %identity, interval = ?interval, "Starting token pusher");
    let mut ticker = tokio::time::interval_at(started + interval, interval);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let Some(cell) = bucket.upgrade() else { break };
                if !cell.lock().push() {
                    trace!(identity = %identity, "Bucket is full, not adding token");
                }
            }
        }
    }

    debug!(identity = %identity, "Stopping token pusher");
}

/// Per-identity token bucket limiter with push refill.
///
/// Must be created inside a tokio runtime; the pushers are spawned on it.
#[derive(Debug)]
pub struct PushBucketLimiter {
    config: PushBucketConfig,
    runtime: Handle,
    buckets: IdentityTable<PushBucket>,
}

impl PushBucketLimiter {
    pub fn new(config: PushBucketConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            RatekeeperError::Runtime(format!("push refill needs a tokio runtime: {}", e))
        })?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create a limiter whose pushers run on `runtime`.
    pub fn with_runtime(config: PushBucketConfig, runtime: Handle) -> Self {
        info!(
            capacity = config.capacity,
            push_interval = ?config.push_interval,
            "Creating push token bucket limiter"
        );
        Self {
            config,
            runtime,
            buckets: IdentityTable::new(),
        }
    }

    pub fn config(&self) -> &PushBucketConfig {
        &self.config
    }

    /// Number of identities currently tracked.
    pub fn identity_count(&self) -> usize {
        self.buckets.len()
    }

    fn create_bucket(&self, identity: &str) -> Arc<Mutex<PushBucket>> {
        let cell = Arc::new(Mutex::new(PushBucket::new(self.config.capacity)));
        let (stop_tx, stop_rx) = oneshot::channel();
        let pusher = self.runtime.spawn(push_tokens(
            identity.to_string(),
            Arc::downgrade(&cell),
            Instant::now(),
            self.config.push_interval,
            stop_rx,
        ));

        {
            let mut bucket = cell.lock();
            bucket.stop = Some(stop_tx);
            bucket.pusher = Some(pusher);
        }
        cell
    }
}

impl RateLimiter for PushBucketLimiter {
    fn decide(&self, identity: &str) -> Decision {
        let Some(cell) = self
            .buckets
            .get_or_create_cell(identity, || self.create_bucket(identity))
        else {
            warn!(identity = %identity, "Decision requested after shutdown");
            return Decision::Reject(RejectReason::Stopped);
        };

        let mut bucket = cell.lock();
        let decision = if bucket.try_take() {
            Decision::Admit
        } else {
            Decision::Reject(RejectReason::BucketEmpty)
        };

        trace!(
            identity = %identity,
            tokens = bucket.tokens,
            decision = ?decision,
            "Push bucket decision"
        );
        decision
    }

    fn forget(&self, identity: &str) {
        self.buckets.remove(identity);
    }

    fn shutdown(&self) {
        if let Some(released) = self.buckets.close() {
            info!(released, "Push token bucket limiter shut down");
        }
    }

    fn limit(&self) -> u64 {
        self.config.capacity
    }

    fn snapshot(&self) -> Snapshot {
        let push_interval_ms = self.config.push_interval.as_millis() as u64;
        let mut snapshot = Snapshot::new(self.name(), self.limit());
        snapshot
            .identities
            .extend(self.buckets.collect(|bucket| IdentityStats::PushBucket {
                tokens: bucket.tokens,
                capacity: bucket.capacity,
                push_interval_ms,
                pusher_active: bucket
                    .pusher
                    .as_ref()
                    .is_some_and(|pusher| !pusher.is_finished()),
            }));
        snapshot
    }

    fn name(&self) -> &'static str {
        "push_token_bucket"
    }
}

impl Drop for PushBucketLimiter {
    fn drop(&mut self) {
        self.buckets.close();
    }
}
