//! Result collection
//!
//! Walks finished tasks in prompt order and hands every generated image to
//! an [`OutputSink`]. A failure on one item never stops the others.

mod folder;
mod summary;

pub use folder::{next_output_folder, FolderSink, OutputFolderError};
pub use summary::{BatchSummary, EntryStatus, SummaryEntry};

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use thiserror::Error;

use crate::generation::{ImageBytes, Outcome, Task};

/// Errors raised while persisting a single result
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Destination for generated images
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn save(&self, index: usize, prompt: &str, image: &ImageBytes) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: OutputSink + ?Sized> OutputSink for std::sync::Arc<S> {
    async fn save(&self, index: usize, prompt: &str, image: &ImageBytes) -> Result<(), SinkError> {
        (**self).save(index, prompt, image).await
    }
}

/// Drives the output sink over finished tasks
pub struct ResultCollector<S> {
    sink: S,
}

impl<S: OutputSink> ResultCollector<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Persist successes in index order and build the per-prompt summary
    pub async fn collect(&self, mut tasks: Vec<Task>) -> BatchSummary {
        tasks.sort_by_key(|task| task.index);
        let mut summary = BatchSummary::default();

        for task in tasks {
            let status = match &task.outcome {
                Some(Outcome::Success(image)) => {
                    let saved = AssertUnwindSafe(self.sink.save(task.index, &task.prompt, image))
                        .catch_unwind()
                        .await;
                    match saved {
                        Ok(Ok(())) => EntryStatus::Saved,
                        Ok(Err(err)) => {
                            tracing::warn!(
                                index = task.index,
                                prompt = %task.preview(),
                                error = %err,
                                "failed to save image"
                            );
                            EntryStatus::SaveFailed(err.to_string())
                        }
                        Err(_) => {
                            tracing::error!(index = task.index, "output sink panicked");
                            EntryStatus::SaveFailed("output sink panicked".to_string())
                        }
                    }
                }
                Some(Outcome::Skipped(reason)) => {
                    tracing::info!(index = task.index, %reason, "prompt skipped");
                    EntryStatus::Skipped(reason.clone())
                }
                Some(Outcome::Failed(err)) => {
                    tracing::info!(index = task.index, error = %err, "prompt failed");
                    EntryStatus::Failed(err.to_string())
                }
                Some(Outcome::Cancelled) => EntryStatus::Cancelled,
                None => EntryStatus::Failed("task finished without an outcome".to_string()),
            };

            summary.push(SummaryEntry {
                index: task.index,
                prompt: task.prompt,
                attempts: task.attempts,
                status,
            });
        }

        summary
    }
}
