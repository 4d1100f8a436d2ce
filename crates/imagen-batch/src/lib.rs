//! Imagen Batch - rate-limited batch image generation
//!
//! Turns a list of prompts into images through a remote generation service
//! while keeping call volume under a sliding-window quota, bounding the
//! number of in-flight calls and retrying transient failures.

pub mod batch;
pub mod collector;
pub mod config;
pub mod generation;
pub mod network;
pub mod parallel;
pub mod providers;
pub mod ratelimit;
pub mod source;

pub use batch::run_batch;
pub use collector::{BatchSummary, FolderSink, OutputSink, ResultCollector};
pub use config::{BatchConfig, ConfigError, PoolConfig};
pub use generation::{GenerationError, ImageGenerator, Outcome, RetryingTask, Task};
pub use parallel::WorkerPool;
pub use ratelimit::{RateLimitConfig, RateLimiter, RetryPolicy};
pub use source::load_prompts;
