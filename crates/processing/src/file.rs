//! File entity: one document within a process and its analysis outcome.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docproc_core::{DomainError, DomainResult, FileId, ProcessId};

/// Upper bound on the number of frequent words kept per file and per result set.
pub const MAX_TOP_WORDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Pending,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "PENDING",
            FileStatus::Completed => "COMPLETED",
            FileStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FileStatus::Pending)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(FileStatus::Pending),
            "COMPLETED" => Ok(FileStatus::Completed),
            "FAILED" => Ok(FileStatus::Failed),
            other => Err(DomainError::validation(format!("unknown file status '{other}'"))),
        }
    }
}

/// Analysis output for a single document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub word_count: u32,
    pub line_count: u32,
    pub character_count: u32,
    /// Most frequent words, most frequent first.
    pub top_words: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub process_id: ProcessId,
    pub file_name: String,
    pub status: FileStatus,
    pub word_count: u32,
    pub line_count: u32,
    pub character_count: u32,
    pub top_words: Vec<String>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl File {
    pub fn pending(process_id: ProcessId, file_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: FileId::new(),
            process_id,
            file_name: file_name.into(),
            status: FileStatus::Pending,
            word_count: 0,
            line_count: 0,
            character_count: 0,
            top_words: Vec::new(),
            summary: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a successful analysis. Returns `false` if an outcome was already recorded.
    pub fn complete(&mut self, metrics: FileMetrics, now: DateTime<Utc>) -> DomainResult<bool> {
        if self.status.is_terminal() {
            return Ok(false);
        }
        if metrics.top_words.len() > MAX_TOP_WORDS {
            return Err(DomainError::validation(format!(
                "file {} reports {} top words (max {MAX_TOP_WORDS})",
                self.id,
                metrics.top_words.len()
            )));
        }

        self.status = FileStatus::Completed;
        self.word_count = metrics.word_count;
        self.line_count = metrics.line_count;
        self.character_count = metrics.character_count;
        self.top_words = metrics.top_words;
        self.summary = Some(metrics.summary);
        self.error_message = None;
        self.updated_at = now;
        Ok(true)
    }

    /// Record a failed analysis. Returns `false` if an outcome was already recorded.
    pub fn fail(&mut self, error_message: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = FileStatus::Failed;
        self.error_message = Some(error_message.into());
        self.updated_at = now;
        true
    }

    /// Metrics are only meaningful for completed files.
    pub fn metrics(&self) -> Option<FileMetrics> {
        (self.status == FileStatus::Completed).then(|| FileMetrics {
            word_count: self.word_count,
            line_count: self.line_count,
            character_count: self.character_count,
            top_words: self.top_words.clone(),
            summary: self.summary.clone().unwrap_or_default(),
        })
    }
}
