//! Per-prompt run summary

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::generation::prompt_preview;

/// What happened to one prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EntryStatus {
    Saved,
    SaveFailed(String),
    Skipped(String),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    pub index: usize,
    pub prompt: String,
    pub attempts: u32,
    pub status: EntryStatus,
}

/// Outcome of a whole batch, one entry per prompt in prompt order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub entries: Vec<SummaryEntry>,
    pub saved: usize,
    pub save_failed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn push(&mut self, entry: SummaryEntry) {
        match entry.status {
            EntryStatus::Saved => self.saved += 1,
            EntryStatus::SaveFailed(_) => self.save_failed += 1,
            EntryStatus::Skipped(_) => self.skipped += 1,
            EntryStatus::Failed(_) => self.failed += 1,
            EntryStatus::Cancelled => self.cancelled += 1,
        }
        self.entries.push(entry);
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn all_saved(&self) -> bool {
        self.saved == self.entries.len()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let prompt = prompt_preview(&entry.prompt);
            match &entry.status {
                EntryStatus::Saved => writeln!(f, "[{:05}] saved     {}", entry.index, prompt)?,
                EntryStatus::SaveFailed(err) => writeln!(
                    f,
                    "[{:05}] unsaved   {} ({})",
                    entry.index, prompt, err
                )?,
                EntryStatus::Skipped(reason) => writeln!(
                    f,
                    "[{:05}] skipped   {} ({})",
                    entry.index, prompt, reason
                )?,
                EntryStatus::Failed(err) => writeln!(
                    f,
                    "[{:05}] failed    {} after {} attempt(s): {}",
                    entry.index, prompt, entry.attempts, err
                )?,
                EntryStatus::Cancelled => {
                    writeln!(f, "[{:05}] cancelled {}", entry.index, prompt)?
                }
            }
        }
        write!(
            f,
            "{} prompt(s): {} saved, {} save error(s), {} skipped, {} failed, {} cancelled",
            self.total(),
            self.saved,
            self.save_failed,
            self.skipped,
            self.failed,
            self.cancelled
        )
    }
}
