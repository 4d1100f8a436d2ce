//! 速率限制和重试系统
//!
//! 全局调用配额与任务级重试退避

mod limiter;
mod retry;


pub use limiter::{RateLimitConfig, RateLimitEvent, RateLimitState, RateLimiter};
pub use retry::{BackoffStrategy, RetryPolicy};
