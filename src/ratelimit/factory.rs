//! Builds limiters from flat configuration maps.

use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::backend::{NoLimit, RateLimiter};
use super::fixed_window::{FixedWindowConfig, FixedWindowLimiter};
use super::push_bucket::{PushBucketConfig, PushBucketLimiter};
use super::sliding_log::{SlidingLogConfig, SlidingLogLimiter};
use super::token_bucket::{TokenBucketConfig, TokenBucketLimiter};
use crate::config::RateConfig;
use crate::error::Result;

/// Algorithm named by a configuration's selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    TokenBucket,
    FixedWindowCounter,
    SlidingWindowLog,
    /// Nothing (or something unrecognized) was selected
    NoLimit,
}

impl Algorithm {
    /// Map a selector string to an algorithm. Unknown or absent selectors mean
    /// "no limiting", which is a supported state rather than an error.
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector.map(str::trim) {
            Some("token_bucket") => Algorithm::TokenBucket,
            Some("fixed_window_counter") => Algorithm::FixedWindowCounter,
            Some("sliding_window_log") => Algorithm::SlidingWindowLog,
            _ => Algorithm::NoLimit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::FixedWindowCounter => "fixed_window_counter",
            Algorithm::SlidingWindowLog => "sliding_window_log",
            Algorithm::NoLimit => "no_limit",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a `token_bucket` configuration asks for the push-refill variant.
///
/// The lazy keys win when both sets are present.
fn wants_push_refill(config: &RateConfig) -> bool {
    let push_keys = config.contains(PushBucketConfig::CAPACITY_KEY)
        || config.contains(PushBucketConfig::PUSH_INTERVAL_KEY);
    let lazy_keys = config.contains(TokenBucketConfig::CAPACITY_KEY)
        || config.contains(TokenBucketConfig::REFILL_RATE_KEY);
    push_keys && !lazy_keys
}

/// Build a limiter for `algorithm`, validating every required key.
///
/// No engine is returned if any key is missing or malformed.
pub fn build(algorithm: Algorithm, config: &RateConfig) -> Result<Arc<dyn RateLimiter>> {
    let limiter: Arc<dyn RateLimiter> = match algorithm {
        Algorithm::TokenBucket if wants_push_refill(config) => Arc::new(PushBucketLimiter::new(
            PushBucketConfig::from_rate_config(config)?,
        )?),
        Algorithm::TokenBucket => Arc::new(TokenBucketLimiter::new(
            TokenBucketConfig::from_rate_config(config)?,
        )),
        Algorithm::FixedWindowCounter => Arc::new(FixedWindowLimiter::new(
            FixedWindowConfig::from_rate_config(config)?,
        )),
        Algorithm::SlidingWindowLog => Arc::new(SlidingLogLimiter::new(
            SlidingLogConfig::from_rate_config(config)?,
        )),
        Algorithm::NoLimit => Arc::new(NoLimit),
    };

    info!(
        algorithm = %algorithm,
        engine = limiter.name(),
        limit = limiter.limit(),
        "Built rate limiter"
    );
    Ok(limiter)
}

/// Build the limiter selected by the configuration's `algo` key.
pub fn from_config(config: &RateConfig) -> Result<Arc<dyn RateLimiter>> {
    build(Algorithm::from_selector(config.selector()), config)
}
