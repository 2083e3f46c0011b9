//! Saga instance state for a processing run (data only, no transitions).
//!
//! - One instance per process; the correlation id *is* the process id
//! - `current_state` is a plain string in storage (`"Processing"` / `"Completed"`)
//! - A per-file stage ledger lets the orchestrator recognize duplicate
//!   deliveries before any counter moves
//! - Once `Completed`, the instance is inert; it is kept as a tombstone so late
//!   or duplicate events can be recognized and ignored
//!
//! The transition rules live in `docproc-infra` (`saga::process_saga`).

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docproc_core::{DomainError, FileId, ProcessId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaPhase {
    Processing,
    Completed,
}

impl SagaPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaPhase::Processing => "Processing",
            SagaPhase::Completed => "Completed",
        }
    }
}

impl fmt::Display for SagaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SagaPhase {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Processing" => Ok(SagaPhase::Processing),
            "Completed" => Ok(SagaPhase::Completed),
            other => Err(DomainError::validation(format!("unknown saga state '{other}'"))),
        }
    }
}

/// How far a single file has progressed, as seen by the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    /// `ProcessFile` was requested.
    Ready,
    /// Analysis succeeded; result write requested.
    Processed,
    /// Analysis failed; failure write requested.
    Failed,
    /// Outcome durably recorded.
    Persisted,
}

impl FileStage {
    /// An analysis outcome (success or failure) has been recorded for the file.
    pub fn has_outcome(&self) -> bool {
        !matches!(self, FileStage::Ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaState {
    pub correlation_id: ProcessId,
    pub current_state: SagaPhase,
    pub total_files: u32,
    /// Files analyzed successfully (persisted or not).
    pub completed_files: u32,
    /// Successful results durably recorded.
    pub persisted_files: u32,
    pub failed_files: u32,
    /// Reserved; never incremented.
    pub skipped_files: u32,
    pub files: BTreeMap<FileId, FileStage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    pub fn new(correlation_id: ProcessId, total_files: u32, now: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            current_state: SagaPhase::Processing,
            total_files,
            completed_files: 0,
            persisted_files: 0,
            failed_files: 0,
            skipped_files: 0,
            files: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.current_state == SagaPhase::Completed
    }

    pub fn stage_of(&self, file_id: FileId) -> Option<FileStage> {
        self.files.get(&file_id).copied()
    }

    /// Every file is accounted for: `persisted + failed >= total`.
    pub fn all_files_accounted(&self) -> bool {
        self.persisted_files + self.failed_files >= self.total_files
    }

    /// Files whose outcome is known but whose write has not been confirmed yet.
    pub fn pending_writes(&self) -> usize {
        self.files
            .values()
            .filter(|s| matches!(s, FileStage::Processed | FileStage::Failed))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_is_stored_as_plain_string() {
        let json = serde_json::to_string(&SagaPhase::Processing).unwrap();
        assert_eq!(json, "\"Processing\"");
        assert_eq!("Completed".parse::<SagaPhase>().unwrap(), SagaPhase::Completed);
        assert!("completed".parse::<SagaPhase>().is_err());
    }

    #[test]
    fn accounting_counts_failures_and_persisted_results() {
        let mut s = SagaState::new(ProcessId::new(), 3, Utc::now());
        s.persisted_files = 2;
        assert!(!s.all_files_accounted());
        s.failed_files = 1;
        assert!(s.all_files_accounted());
    }

    #[test]
    fn pending_writes_ignore_ready_and_persisted_files() {
        let mut s = SagaState::new(ProcessId::new(), 4, Utc::now());
        s.files.insert(FileId::new(), FileStage::Ready);
        s.files.insert(FileId::new(), FileStage::Processed);
        s.files.insert(FileId::new(), FileStage::Failed);
        s.files.insert(FileId::new(), FileStage::Persisted);
        assert_eq!(s.pending_writes(), 2);
    }
}
