//! Batch orchestration
//!
//! 限流器 → 重试任务 → 工作池 → 结果收集，一次运行共享同一个限流器。

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::{BatchSummary, OutputSink, ResultCollector};
use crate::config::{BatchConfig, ConfigError};
use crate::generation::{ImageGenerator, RetryingTask};
use crate::parallel::WorkerPool;
use crate::ratelimit::{RateLimitEvent, RateLimiter};

/// Generate one image per prompt and hand every success to `sink`
///
/// Invalid configuration is the only error; per-prompt failures end up in
/// the returned summary. Cancelling `cancel` stops scheduling new work and
/// lets in-flight calls finish.
pub async fn run_batch<S: OutputSink>(
    config: &BatchConfig,
    generator: Arc<dyn ImageGenerator>,
    sink: S,
    prompts: Vec<String>,
    cancel: CancellationToken,
) -> Result<BatchSummary, ConfigError> {
    config.validate()?;

    if prompts.is_empty() {
        tracing::warn!("prompt list is empty, nothing to generate");
        return Ok(BatchSummary::default());
    }

    let (event_tx, events) = mpsc::unbounded_channel();
    let limiter =
        Arc::new(RateLimiter::new(config.rate_limit.clone())?.with_event_channel(event_tx));
    let runner = RetryingTask::new(generator, limiter, config.retry.clone())
        .with_attempt_timeout(config.attempt_timeout())
        .with_cancel_token(cancel);
    let pool = Arc::new(WorkerPool::new(&config.pool, runner)?);
    let reporter = spawn_progress_reporter(pool.clone(), events);

    tracing::info!(
        prompts = prompts.len(),
        max_calls = config.rate_limit.max_calls,
        period_seconds = config.rate_limit.period_seconds,
        max_concurrency = config.pool.max_concurrency,
        max_retries = config.retry.max_retries,
        "starting batch"
    );
    let started = Instant::now();

    let tasks = pool.run(prompts).await;
    // the pool keeps the limiter (and so the sender) alive
    reporter.abort();
    let summary = ResultCollector::new(sink).collect(tasks).await;

    tracing::info!(
        saved = summary.saved,
        save_failed = summary.save_failed,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = summary.cancelled,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "batch finished"
    );
    Ok(summary)
}

/// Log pool progress every time the quota makes a caller wait
fn spawn_progress_reporter(
    pool: Arc<WorkerPool>,
    mut events: mpsc::UnboundedReceiver<RateLimitEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(RateLimitEvent::Throttled { wait, in_window, limit }) = events.recv().await {
            let status = pool.status();
            tracing::info!(
                wait_ms = wait.as_millis() as u64,
                in_window,
                limit,
                pending = status.pending_tasks,
                running = status.running_tasks,
                completed = status.completed_tasks,
                cancelled = status.cancelled_tasks,
                "quota exhausted, waiting"
            );
        }
    })
}
