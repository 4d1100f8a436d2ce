//! Folder-backed output sink
//!
//! `images/`, then `images1/` … `images{max}/` on later runs. Each result is
//! written as `<folder>_<index:05>.<ext>` plus a `.txt` holding its prompt.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::{OutputSink, SinkError};
use crate::generation::ImageBytes;

#[derive(Debug, Error)]
pub enum OutputFolderError {
    #[error("all output folders {base}1..={max_index} already exist")]
    Exhausted { base: String, max_index: usize },

    #[error("failed to create output folder {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pick and create the first unused output folder
pub fn next_output_folder(base: &Path, max_index: usize) -> Result<PathBuf, OutputFolderError> {
    let create = |path: PathBuf| {
        std::fs::create_dir_all(&path)
            .map(|_| path.clone())
            .map_err(|source| OutputFolderError::Create { path, source })
    };

    if !base.exists() {
        return create(base.to_path_buf());
    }

    let base_name = base.as_os_str().to_string_lossy().into_owned();
    for i in 1..=max_index {
        let candidate = PathBuf::from(format!("{}{}", base_name, i));
        if !candidate.exists() {
            return create(candidate);
        }
    }

    Err(OutputFolderError::Exhausted {
        base: base_name,
        max_index,
    })
}

/// Writes images and their prompts into one folder
#[derive(Debug, Clone)]
pub struct FolderSink {
    folder: PathBuf,
    stem: String,
}

impl FolderSink {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        let stem = folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Self { folder, stem }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn image_path(&self, index: usize, extension: &str) -> PathBuf {
        self.folder
            .join(format!("{}_{:05}.{}", self.stem, index, extension))
    }

    pub fn prompt_path(&self, index: usize) -> PathBuf {
        self.folder.join(format!("{}_{:05}.txt", self.stem, index))
    }
}

#[async_trait]
impl OutputSink for FolderSink {
    async fn save(&self, index: usize, prompt: &str, image: &ImageBytes) -> Result<(), SinkError> {
        let image_path = self.image_path(index, image.extension());
        tokio::fs::write(&image_path, image.as_bytes())
            .await
            .map_err(|source| SinkError::Io {
                path: image_path.clone(),
                source,
            })?;

        let prompt_path = self.prompt_path(index);
        tokio::fs::write(&prompt_path, prompt.as_bytes())
            .await
            .map_err(|source| SinkError::Io {
                path: prompt_path.clone(),
                source,
            })?;

        tracing::info!(
            index,
            image = %image_path.display(),
            prompt_file = %prompt_path.display(),
            "saved image"
        );
        Ok(())
    }
}
