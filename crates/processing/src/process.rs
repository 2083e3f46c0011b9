//! Process aggregate: one uploaded batch of documents moving through the pipeline.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docproc_core::{DomainError, DomainResult, ProcessId};

use crate::file::{File, FileStatus};

/// Lifecycle status of a process.
///
/// Stored and exposed as SCREAMING_SNAKE strings (`"COMPLETED_WITH_FAILURES"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Pending,
    Running,
    Completed,
    CompletedWithFailures,
    Failed,
    Stopped,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "PENDING",
            ProcessStatus::Running => "RUNNING",
            ProcessStatus::Completed => "COMPLETED",
            ProcessStatus::CompletedWithFailures => "COMPLETED_WITH_FAILURES",
            ProcessStatus::Failed => "FAILED",
            ProcessStatus::Stopped => "STOPPED",
        }
    }

    /// Terminal statuses are written once and never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed
                | ProcessStatus::CompletedWithFailures
                | ProcessStatus::Failed
                | ProcessStatus::Stopped
        )
    }

    /// Whether aggregated results may be read for a process in this status.
    pub fn has_results(&self) -> bool {
        matches!(self, ProcessStatus::Completed | ProcessStatus::CompletedWithFailures)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessStatus::Pending),
            "RUNNING" => Ok(ProcessStatus::Running),
            "COMPLETED" => Ok(ProcessStatus::Completed),
            "COMPLETED_WITH_FAILURES" => Ok(ProcessStatus::CompletedWithFailures),
            "FAILED" => Ok(ProcessStatus::Failed),
            "STOPPED" => Ok(ProcessStatus::Stopped),
            other => Err(DomainError::validation(format!("unknown process status '{other}'"))),
        }
    }
}

pub const STOPPED_BY_REQUEST: &str = "Stopped by request";

/// Completed/failed tallies derived from file records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub completed: u32,
    pub failed: u32,
}

impl FileCounts {
    pub fn tally(files: &[File]) -> Self {
        files.iter().fold(Self::default(), |mut acc, f| {
            match f.status {
                FileStatus::Completed => acc.completed += 1,
                FileStatus::Failed => acc.failed += 1,
                FileStatus::Pending => {}
            }
            acc
        })
    }

    pub fn processed(&self) -> u32 {
        self.completed + self.failed
    }
}

/// Result of asking a process to move to a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied,
    /// Already in the requested status.
    Unchanged,
    /// The process already reached this terminal status; nothing was written.
    AlreadyTerminal(ProcessStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub status: ProcessStatus,
    pub total_files: u32,
    pub completed_files: u32,
    pub failed_files: u32,
    /// Reserved; never populated by the pipeline.
    pub skipped_files: u32,
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Process {
    pub fn new(id: ProcessId, total_files: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: ProcessStatus::Pending,
            total_files,
            completed_files: 0,
            failed_files: 0,
            skipped_files: 0,
            reason: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn processed_files(&self) -> u32 {
        self.completed_files + self.failed_files
    }

    /// Move the process to `next`.
    ///
    /// Transitions are monotonic: once terminal, every request is answered with
    /// [`StatusChange::AlreadyTerminal`] and the record is left untouched.
    /// `Running` stamps `started_at`; any terminal status stamps `completed_at`.
    pub fn transition_to(
        &mut self,
        next: ProcessStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<StatusChange> {
        if self.status.is_terminal() {
            return Ok(StatusChange::AlreadyTerminal(self.status));
        }
        if self.status == next {
            return Ok(StatusChange::Unchanged);
        }

        match next {
            ProcessStatus::Pending => {
                return Err(DomainError::invariant(format!(
                    "process {} cannot move from {} back to {}",
                    self.id, self.status, next
                )));
            }
            ProcessStatus::Running => {
                self.started_at.get_or_insert(now);
            }
            _ => {
                self.completed_at = Some(now);
            }
        }

        self.status = next;
        if reason.is_some() {
            self.reason = reason;
        }
        self.updated_at = now;
        Ok(StatusChange::Applied)
    }

    /// Stop a process that is still pending or running.
    pub fn stop(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "process {} is already finished ({})",
                self.id, self.status
            )));
        }
        self.transition_to(ProcessStatus::Stopped, Some(STOPPED_BY_REQUEST.to_string()), now)?;
        Ok(())
    }

    /// Overwrite the completed/failed counters.
    pub fn record_counts(&mut self, counts: FileCounts, now: DateTime<Utc>) -> DomainResult<()> {
        if counts.processed() > self.total_files {
            return Err(DomainError::invariant(format!(
                "process {} would account for {} of {} files",
                self.id,
                counts.processed(),
                self.total_files
            )));
        }
        self.completed_files = counts.completed;
        self.failed_files = counts.failed;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn pending(total: u32) -> Process {
        Process::new(ProcessId::new(), total, Utc::now())
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            ProcessStatus::Pending,
            ProcessStatus::Running,
            ProcessStatus::Completed,
            ProcessStatus::CompletedWithFailures,
            ProcessStatus::Failed,
            ProcessStatus::Stopped,
        ] {
            assert_eq!(status.as_str().parse::<ProcessStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("DONE".parse::<ProcessStatus>().is_err());
    }

    #[test]
    fn running_stamps_started_at_once() {
        let mut p = pending(2);
        let t0 = Utc::now();
        assert_eq!(p.transition_to(ProcessStatus::Running, None, t0).unwrap(), StatusChange::Applied);
        assert_eq!(p.started_at, Some(t0));

        let later = t0 + TimeDelta::seconds(5);
        assert_eq!(p.transition_to(ProcessStatus::Running, None, later).unwrap(), StatusChange::Unchanged);
        assert_eq!(p.started_at, Some(t0));
    }

    #[test]
    fn terminal_status_is_never_left() {
        let mut p = pending(1);
        let now = Utc::now();
        p.transition_to(ProcessStatus::Completed, Some("done".into()), now).unwrap();
        assert_eq!(p.completed_at, Some(now));

        let change = p
            .transition_to(ProcessStatus::Running, None, now + TimeDelta::seconds(1))
            .unwrap();
        assert_eq!(change, StatusChange::AlreadyTerminal(ProcessStatus::Completed));
        assert_eq!(p.status, ProcessStatus::Completed);
        assert_eq!(p.reason.as_deref(), Some("done"));
    }

    #[test]
    fn cannot_go_back_to_pending() {
        let mut p = pending(1);
        p.transition_to(ProcessStatus::Running, None, Utc::now()).unwrap();
        let err = p.transition_to(ProcessStatus::Pending, None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn stop_conflicts_once_finished() {
        let mut p = pending(1);
        p.stop(Utc::now()).unwrap();
        assert_eq!(p.status, ProcessStatus::Stopped);

        let err = p.stop(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn stopped_process_ignores_final_status() {
        let mut p = pending(1);
        p.stop(Utc::now()).unwrap();
        let change = p
            .transition_to(ProcessStatus::CompletedWithFailures, None, Utc::now())
            .unwrap();
        assert_eq!(change, StatusChange::AlreadyTerminal(ProcessStatus::Stopped));
    }

    #[test]
    fn counts_may_not_exceed_total() {
        let mut p = pending(2);
        p.record_counts(FileCounts { completed: 1, failed: 1 }, Utc::now()).unwrap();
        assert_eq!(p.processed_files(), 2);

        let err = p
            .record_counts(FileCounts { completed: 2, failed: 1 }, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(p.completed_files, 1);
    }
}
