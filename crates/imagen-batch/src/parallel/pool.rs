//! Worker Pool
//!
//! Bounded-concurrency executor: one [`RetryingTask`] run per prompt, at
//! most `max_concurrency` in flight, results handed back in prompt order.

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, PoolConfig};
use crate::generation::{GenerationError, Outcome, RetryingTask, Task};

/// Pool status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub pool_size: usize,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub cancelled_tasks: usize,
    pub shutting_down: bool,
}

#[derive(Default)]
struct PoolProgress {
    total: AtomicUsize,
    pending: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl PoolProgress {
    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.pending.store(total, Ordering::SeqCst);
        self.running.store(0, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.cancelled.store(0, Ordering::SeqCst);
    }

    fn start(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self, task: &Task) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        if matches!(task.outcome, Some(Outcome::Cancelled)) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        } else {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn abandon(&self, count: usize) {
        self.pending.fetch_sub(count, Ordering::SeqCst);
        self.cancelled.fetch_add(count, Ordering::SeqCst);
    }
}

/// Worker pool running one retrying task per prompt
pub struct WorkerPool {
    max_concurrency: usize,
    runner: Arc<RetryingTask>,
    cancel: CancellationToken,
    progress: Arc<PoolProgress>,
}

impl WorkerPool {
    /// Create a pool; cancellation follows the runner's token
    pub fn new(config: &PoolConfig, runner: RetryingTask) -> Result<Self, ConfigError> {
        if config.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrency",
                reason: "must be greater than 0".to_string(),
            });
        }
        let cancel = runner.cancel_token().clone();
        Ok(Self {
            max_concurrency: config.max_concurrency,
            runner: Arc::new(runner),
            cancel,
            progress: Arc::new(PoolProgress::default()),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Stop scheduling new tasks; in-flight attempts are allowed to finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            pool_size: self.max_concurrency,
            total_tasks: self.progress.total.load(Ordering::SeqCst),
            pending_tasks: self.progress.pending.load(Ordering::SeqCst),
            running_tasks: self.progress.running.load(Ordering::SeqCst),
            completed_tasks: self.progress.completed.load(Ordering::SeqCst),
            cancelled_tasks: self.progress.cancelled.load(Ordering::SeqCst),
            shutting_down: self.cancel.is_cancelled(),
        }
    }

    /// Run every prompt and return the finished tasks sorted by index
    ///
    /// A task is only spawned once a slot is free, so at most
    /// `max_concurrency` tasks exist at any time. Tasks still waiting for a
    /// slot when the run is cancelled come back as [`Outcome::Cancelled`].
    pub async fn run(&self, prompts: Vec<String>) -> Vec<Task> {
        let total = prompts.len();
        self.progress.reset(total);
        if total == 0 {
            tracing::debug!("no prompts to run");
            return Vec::new();
        }

        tracing::info!(
            total,
            max_concurrency = self.max_concurrency,
            "dispatching generation tasks"
        );

        let slots = Arc::new(Semaphore::new(self.max_concurrency));
        let mut workers = JoinSet::new();
        let mut finished = Vec::with_capacity(total);
        let mut spawned = Vec::with_capacity(total);
        let mut queue = prompts
            .into_iter()
            .enumerate()
            .map(|(i, prompt)| Task::new(i + 1, prompt));

        while let Some(task) = queue.next() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = slots.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let abandoned: Vec<Task> = std::iter::once(task)
                    .chain(queue.by_ref())
                    .map(Task::abandon)
                    .collect();
                tracing::warn!(
                    abandoned = abandoned.len(),
                    "run cancelled, abandoning unscheduled tasks"
                );
                self.progress.abandon(abandoned.len());
                finished.extend(abandoned);
                break;
            };

            self.progress.start();
            spawned.push((task.index, task.prompt.clone()));
            let runner = self.runner.clone();
            let progress = self.progress.clone();
            workers.spawn(async move {
                let _permit = permit;
                let mut task = task;

                let panicked = AssertUnwindSafe(runner.run(&mut task))
                    .catch_unwind()
                    .await
                    .is_err();
                if panicked {
                    tracing::error!(index = task.index, "generation task panicked");
                    task.completed_at = Some(Utc::now());
                    task.outcome = Some(Outcome::Failed(GenerationError::Panicked(format!(
                        "task {} panicked",
                        task.index
                    ))));
                }

                progress.finish(&task);
                task
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(task) => finished.push(task),
                Err(err) => tracing::error!(error = %err, "worker task aborted"),
            }
        }
        for task in recover_lost_tasks(&finished, spawned) {
            self.progress.finish(&task);
            finished.push(task);
        }

        finished.sort_by_key(|task| task.index);
        tracing::info!(
            finished = finished.len(),
            succeeded = finished
                .iter()
                .filter(|t| matches!(t.outcome, Some(Outcome::Success(_))))
                .count(),
            "all generation tasks finished"
        );
        finished
    }
}

/// Spawned tasks whose worker never handed its task back
///
/// Each one comes back `Failed`, so every prompt still ends with one outcome.
fn recover_lost_tasks(finished: &[Task], spawned: Vec<(usize, String)>) -> Vec<Task> {
    let reported: HashSet<usize> = finished.iter().map(|task| task.index).collect();
    spawned
        .into_iter()
        .filter(|(index, _)| !reported.contains(index))
        .map(|(index, prompt)| {
            tracing::error!(index, "worker lost its task, marking it failed");
            let mut task = Task::new(index, prompt);
            task.completed_at = Some(Utc::now());
            task.outcome = Some(Outcome::Failed(GenerationError::Other(
                "worker aborted before reporting an outcome".to_string(),
            )));
            task
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ImageGenerator;
    use crate::ratelimit::{RateLimitConfig, RateLimiter, RetryPolicy};
    use async_trait::async_trait;
    use std::time::Duration;

    const PNG: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    /// Sleeps for a prompt-dependent time and tracks peak concurrency
    struct TrackingGenerator {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        base_delay: Duration,
    }

    impl TrackingGenerator {
        fn new(base_delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                base_delay,
            }
        }
    }

    #[async_trait]
    impl ImageGenerator for TrackingGenerator {
        async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            // earlier prompts take longer so completion order differs from submission order
            let weight = 10u32.saturating_sub(prompt.len() as u32).max(1);
            tokio::time::sleep(self.base_delay * weight).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if prompt.contains("panic") {
                panic!("generator blew up");
            }
            Ok(PNG.to_vec())
        }
    }

    fn pool_with(generator: Arc<TrackingGenerator>, max_concurrency: usize) -> WorkerPool {
        let limiter =
            Arc::new(RateLimiter::new(RateLimitConfig::new(1000, Duration::from_secs(1))).unwrap());
        let runner = RetryingTask::new(generator, limiter, RetryPolicy::fixed(1, Duration::ZERO));
        WorkerPool::new(&PoolConfig { max_concurrency }, runner).unwrap()
    }

    fn prompts(n: usize) -> Vec<String> {
        (0..n).map(|i| "p".repeat(i % 9 + 1)).collect()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let generator = Arc::new(TrackingGenerator::new(Duration::ZERO));
        let limiter =
            Arc::new(RateLimiter::new(RateLimitConfig::new(1, Duration::from_secs(1))).unwrap());
        let runner = RetryingTask::new(generator, limiter, RetryPolicy::default());
        assert!(WorkerPool::new(&PoolConfig { max_concurrency: 0 }, runner).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_prompt_list() {
        let pool = pool_with(Arc::new(TrackingGenerator::new(Duration::ZERO)), 3);
        let tasks = pool.run(Vec::new()).await;

        assert!(tasks.is_empty());
        assert_eq!(pool.status().total_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let generator = Arc::new(TrackingGenerator::new(Duration::from_millis(100)));
        let pool = pool_with(generator.clone(), 3);

        let tasks = pool.run(prompts(12)).await;

        assert_eq!(tasks.len(), 12);
        assert_eq!(generator.peak.load(Ordering::SeqCst), 3);
        assert!(tasks.iter().all(|t| t.outcome.as_ref().is_some_and(Outcome::is_success)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_in_submission_order() {
        let generator = Arc::new(TrackingGenerator::new(Duration::from_millis(50)));
        let pool = pool_with(generator, 4);

        let input = prompts(9);
        let tasks = pool.run(input.clone()).await;

        let indices: Vec<usize> = tasks.iter().map(|t| t.index).collect();
        assert_eq!(indices, (1..=9).collect::<Vec<_>>());
        let returned: Vec<String> = tasks.iter().map(|t| t.prompt.clone()).collect();
        assert_eq!(returned, input);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_after_run() {
        let pool = pool_with(Arc::new(TrackingGenerator::new(Duration::from_millis(10))), 2);
        pool.run(prompts(5)).await;

        let status = pool.status();
        assert_eq!(status.total_tasks, 5);
        assert_eq!(status.pending_tasks, 0);
        assert_eq!(status.running_tasks, 0);
        assert_eq!(status.completed_tasks, 5);
        assert!(!status.shutting_down);
    }

    #[test]
    fn test_lost_tasks_are_recovered_as_failed() {
        let mut reported = Task::new(1, "kept");
        reported.outcome = Some(Outcome::Cancelled);
        let spawned = vec![(1, "kept".to_string()), (2, "lost".to_string())];

        let recovered = recover_lost_tasks(&[reported], spawned);

        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].index, 2);
        assert_eq!(recovered[0].prompt, "lost");
        assert!(matches!(
            recovered[0].outcome,
            Some(Outcome::Failed(GenerationError::Other(_)))
        ));
    }

    #[test]
    fn test_nothing_recovered_when_all_reported() {
        let tasks = vec![Task::new(1, "a").abandon(), Task::new(2, "b").abandon()];
        let spawned = vec![(1, "a".to_string()), (2, "b".to_string())];

        assert!(recover_lost_tasks(&tasks, spawned).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_isolated() {
        let pool = pool_with(Arc::new(TrackingGenerator::new(Duration::from_millis(10))), 2);
        let input = vec!["ok".to_string(), "panic now".to_string(), "fine".to_string()];

        let tasks = pool.run(input).await;

        assert_eq!(tasks.len(), 3);
        assert!(tasks[0].outcome.as_ref().is_some_and(Outcome::is_success));
        assert!(matches!(
            tasks[1].outcome,
            Some(Outcome::Failed(GenerationError::Panicked(_)))
        ));
        assert!(tasks[2].outcome.as_ref().is_some_and(Outcome::is_success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_unscheduled() {
        let generator = Arc::new(TrackingGenerator::new(Duration::from_millis(100)));
        let pool = Arc::new(pool_with(generator, 1));
        // all prompts have the same length, so every call takes 800ms
        let input: Vec<String> = (0..5).map(|i| format!("p{}", i)).collect();

        let canceller = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1300)).await;
            canceller.cancel();
        });

        let tasks = pool.run(input).await;

        assert_eq!(tasks.len(), 5);
        assert!(tasks[0].outcome.as_ref().is_some_and(Outcome::is_success));
        // in flight when the cancel arrived, allowed to finish
        assert!(tasks[1].outcome.as_ref().is_some_and(Outcome::is_success));
        for task in &tasks[2..] {
            assert_eq!(task.outcome, Some(Outcome::Cancelled));
            assert_eq!(task.attempts, 0);
        }

        let status = pool.status();
        assert!(status.shutting_down);
        assert_eq!(status.completed_tasks, 2);
        assert_eq!(status.cancelled_tasks, 3);
    }
}
