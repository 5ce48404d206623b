//! Abuse controls: per-client sliding-window rate limiting and IP blocking.

pub mod ip_guard;
pub mod rate_limit;

pub use ip_guard::IpAbuseTracker;
pub use rate_limit::{Bucket, RateLimiter};
