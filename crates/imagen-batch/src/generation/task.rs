//! Retrying generation task
//!
//! One prompt, bounded attempts. Every attempt first takes an admission
//! from the shared [`RateLimiter`]; rejected prompts are never retried.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{GenerationError, ImageBytes, ImageGenerator};
use crate::network::{cancelable_delay, with_timeout};
use crate::ratelimit::{RateLimiter, RetryPolicy};

const PREVIEW_CHARS: usize = 50;

/// Final result of one task
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A validated, non-empty image
    Success(ImageBytes),
    /// The service rejected the prompt; carries the reason
    Skipped(String),
    /// All attempts failed; carries the last error
    Failed(GenerationError),
    /// Abandoned because the run was cancelled
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Skipped(_) => "skipped",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// One unit of work: a prompt and the slot its outcome lands in
#[derive(Debug, Clone)]
pub struct Task {
    /// 1-based position in the prompt list
    pub index: usize,
    pub prompt: String,
    /// Remote calls issued so far
    pub attempts: u32,
    pub outcome: Option<Outcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(index: usize, prompt: impl Into<String>) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            attempts: 0,
            outcome: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark a task that was never scheduled
    pub fn abandon(mut self) -> Self {
        self.outcome = Some(Outcome::Cancelled);
        self
    }

    /// Wall-clock time between start and completion
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    /// Truncated prompt for log lines
    pub fn preview(&self) -> String {
        prompt_preview(&self.prompt)
    }
}

pub(crate) fn prompt_preview(prompt: &str) -> String {
    if prompt.chars().count() <= PREVIEW_CHARS {
        prompt.to_string()
    } else {
        let head: String = prompt.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    }
}

/// Runs one task against the generator with rate limiting and retries
pub struct RetryingTask {
    generator: Arc<dyn ImageGenerator>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    cancel: CancellationToken,
}

impl RetryingTask {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            limiter,
            policy,
            attempt_timeout: Duration::from_secs(120),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run the task to completion and store its outcome
    pub async fn run<'a>(&self, task: &'a mut Task) -> &'a Outcome {
        task.started_at = Some(Utc::now());
        let outcome = self.execute(task).await;
        task.completed_at = Some(Utc::now());
        task.outcome.insert(outcome)
    }

    async fn execute(&self, task: &mut Task) -> Outcome {
        let max_attempts = self.policy.max_retries;
        let mut last_error = None;

        while task.attempts < max_attempts {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(index = task.index, attempts = task.attempts, "task cancelled before next attempt");
                    return Outcome::Cancelled;
                }
                _ = self.limiter.acquire() => {}
            }

            task.attempts += 1;
            let attempt = task.attempts;
            tracing::info!(
                index = task.index,
                attempt,
                prompt = %task.preview(),
                "generating image"
            );

            // In-flight calls are never interrupted by cancellation, only by the attempt timeout.
            let result = match with_timeout(
                self.generator.generate(&task.prompt),
                self.attempt_timeout,
            )
            .await
            {
                Ok(result) => result.and_then(ImageBytes::from_payload),
                Err(elapsed) => Err(GenerationError::Timeout(elapsed.timeout)),
            };

            match result {
                Ok(image) => {
                    tracing::debug!(
                        index = task.index,
                        attempt,
                        bytes = image.len(),
                        mime = image.mime_type(),
                        "image generated"
                    );
                    return Outcome::Success(image);
                }
                Err(GenerationError::Rejected(reason)) => {
                    tracing::warn!(index = task.index, %reason, "prompt rejected, skipping");
                    return Outcome::Skipped(reason);
                }
                Err(err) => {
                    tracing::warn!(
                        index = task.index,
                        attempt,
                        max_attempts,
                        error = %err,
                        "generation attempt failed"
                    );
                    last_error = Some(err);

                    if attempt < max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        if cancelable_delay(delay, Some(&self.cancel)).await.is_err() {
                            tracing::info!(index = task.index, attempts = attempt, "task cancelled during backoff");
                            return Outcome::Cancelled;
                        }
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            GenerationError::Other("no attempts allowed (max_retries is 0)".to_string())
        });
        tracing::error!(
            index = task.index,
            attempts = task.attempts,
            error = %error,
            "giving up on image"
        );
        Outcome::Failed(error)
    }
}
