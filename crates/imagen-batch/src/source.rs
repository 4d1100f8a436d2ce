//! Prompt source
//!
//! 每行一个提示词，首尾空白会被去除，空行跳过。

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptSourceError {
    #[error("failed to read prompts from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Split prompt text into non-blank, trimmed lines
pub fn parse_prompts(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load prompts from a file, one per line
///
/// An unreadable file is an error. A readable file without any prompt yields
/// an empty list and a warning.
pub async fn load_prompts(path: impl AsRef<Path>) -> Result<Vec<String>, PromptSourceError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| PromptSourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let prompts = parse_prompts(&text);
    if prompts.is_empty() {
        tracing::warn!(path = %path.display(), "no prompts found");
    } else {
        tracing::info!(path = %path.display(), count = prompts.len(), "loaded prompts");
    }
    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_trims_and_skips_blank_lines() {
        let prompts = parse_prompts("  a red fox \n\n\t\nblue whale\r\n   \n");
        assert_eq!(prompts, vec!["a red fox", "blue whale"]);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_prompts("").is_empty());
        assert!(parse_prompts("\n \n\t").is_empty());
    }

    #[tokio::test]
    async fn test_load_prompts_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "first prompt").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  second prompt  ").unwrap();

        let prompts = load_prompts(file.path()).await.unwrap();
        assert_eq!(prompts, vec!["first prompt", "second prompt"]);
    }

    #[tokio::test]
    async fn test_load_prompts_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let prompts = load_prompts(file.path()).await.unwrap();
        assert!(prompts.is_empty());
    }

    #[tokio::test]
    async fn test_load_prompts_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_prompts(dir.path().join("nope.txt")).await.unwrap_err();
        assert!(matches!(err, PromptSourceError::Read { .. }));
    }
}
