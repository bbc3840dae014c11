//! Rate limiting engines and the plumbing that selects and swaps them.

mod backend;
mod factory;
mod fixed_window;
mod push_bucket;
mod sliding_log;
mod swap;
mod table;
mod token_bucket;

pub use backend::{
    Decision, IdentityStats, NoLimit, RateLimiter, RejectReason, Snapshot, UNBOUNDED_LIMIT,
};
pub use factory::{build, from_config, Algorithm};
pub use fixed_window::{FixedWindowConfig, FixedWindowLimiter};
pub use push_bucket::{PushBucketConfig, PushBucketLimiter};
pub use sliding_log::{SlidingLogConfig, SlidingLogLimiter};
pub use swap::SwappableLimiter;
pub use token_bucket::{TokenBucketConfig, TokenBucketLimiter};
