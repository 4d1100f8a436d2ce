//! Image generation capability
//!
//! The remote service is consumed through the [`ImageGenerator`] trait; the
//! retry loop around it lives in [`RetryingTask`].

mod image;
mod task;

pub use image::{detect_image_mime, extension_for_mime, ImageBytes};
pub use task::{Outcome, RetryingTask, Task};
pub(crate) use task::prompt_preview;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a single generation attempt
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerationError {
    /// The service refused the prompt (safety filter, policy block)
    #[error("prompt rejected: {0}")]
    Rejected(String),

    #[error("empty response: {0}")]
    EmptyResponse(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("service error (status {status}): {message}")]
    Service { status: u16, message: String },

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl GenerationError {
    /// Terminal errors are never retried
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationError::Rejected(_))
    }
}

/// The remote image-generation capability
///
/// Implementations return the raw payload of one generated image. An empty
/// payload is not an error at this level; [`RetryingTask`] classifies it.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rejected_is_terminal() {
        assert!(GenerationError::Rejected("blocked".into()).is_terminal());
        assert!(!GenerationError::EmptyResponse("none".into()).is_terminal());
        assert!(!GenerationError::MalformedResponse("junk".into()).is_terminal());
        assert!(!GenerationError::Network("reset".into()).is_terminal());
        assert!(!GenerationError::Service {
            status: 503,
            message: "unavailable".into()
        }
        .is_terminal());
        assert!(!GenerationError::Timeout(Duration::from_secs(1)).is_terminal());
        assert!(!GenerationError::Other("boom".into()).is_terminal());
    }

    #[test]
    fn test_error_display() {
        let err = GenerationError::Service {
            status: 500,
            message: "internal".into(),
        };
        assert_eq!(err.to_string(), "service error (status 500): internal");
        assert_eq!(
            GenerationError::Rejected("unsafe".into()).to_string(),
            "prompt rejected: unsafe"
        );
    }
}
