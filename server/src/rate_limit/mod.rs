//! Hourly send-rate limiting with a fast counter path and a durable fallback

mod counter;
mod limiter;

pub use counter::{CounterBackend, InMemoryCounterBackend};
pub use limiter::{RateLimitDecision, RateLimiter};

// vim: ts=4
