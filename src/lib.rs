//! Ratekeeper - Pluggable Per-Identity Rate Limiting
//!
//! This crate decides whether a request from a given identity (a user id,
//! an IP address, an API key) is admitted. The decision is made by one of
//! several interchangeable algorithms: a token bucket, a fixed window counter
//! or a sliding window log. Engines are built from a flat configuration map
//! and can be swapped at runtime without dropping requests.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
