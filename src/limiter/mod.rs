//! Abuse control on shared counters: a fixed-window limiter and an
//! escalating block for login and two-factor verification.
//!
//! All counting goes through the cache's atomic increment, so processes
//! share limits without any local locking.

mod block;
mod record;
mod window;

pub use block::{
    BlockGuard, BlockPolicy, BlockScope, FailureOutcome, DEFAULT_BLOCK_DURATION,
    DEFAULT_BLOCK_THRESHOLD, DEFAULT_BLOCK_WINDOW,
};
pub use record::AttemptCount;
pub use window::{
    LimitConfig, NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter, WindowPolicy,
    WindowRateLimiter, DEFAULT_LOGIN_POLICY, DEFAULT_REQUEST_POLICY, DEFAULT_VERIFY_POLICY,
};
