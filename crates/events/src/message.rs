//! Pipeline messages.
//!
//! Events report what a stage did; commands tell a stage what to do next. Every
//! message carries the process id, which doubles as the saga correlation id.

use serde::{Deserialize, Serialize};

use docproc_core::{FileId, ProcessId};
use docproc_processing::{FileMetrics, FileStatus, ProcessStatus};

// -------------------------
// Events
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStarted {
    pub process_id: ProcessId,
    pub file_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReady {
    pub process_id: ProcessId,
    pub file_id: FileId,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProcessed {
    pub process_id: ProcessId,
    pub file_id: FileId,
    pub file_name: String,
    pub metrics: FileMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailed {
    pub process_id: ProcessId,
    pub file_id: FileId,
    pub file_name: String,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePersisted {
    pub process_id: ProcessId,
    pub file_id: FileId,
    pub file_name: String,
    pub status: FileStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ProcessStarted(ProcessStarted),
    FileReady(FileReady),
    FileProcessed(FileProcessed),
    FileFailed(FileFailed),
    FilePersisted(FilePersisted),
}

impl PipelineEvent {
    pub fn correlation_id(&self) -> ProcessId {
        match self {
            PipelineEvent::ProcessStarted(e) => e.process_id,
            PipelineEvent::FileReady(e) => e.process_id,
            PipelineEvent::FileProcessed(e) => e.process_id,
            PipelineEvent::FileFailed(e) => e.process_id,
            PipelineEvent::FilePersisted(e) => e.process_id,
        }
    }

    pub fn file_id(&self) -> Option<FileId> {
        match self {
            PipelineEvent::ProcessStarted(_) => None,
            PipelineEvent::FileReady(e) => Some(e.file_id),
            PipelineEvent::FileProcessed(e) => Some(e.file_id),
            PipelineEvent::FileFailed(e) => Some(e.file_id),
            PipelineEvent::FilePersisted(e) => Some(e.file_id),
        }
    }

    /// Stable name used in logs and dead-letter records.
    pub fn message_type(&self) -> &'static str {
        match self {
            PipelineEvent::ProcessStarted(_) => "process_started",
            PipelineEvent::FileReady(_) => "file_ready",
            PipelineEvent::FileProcessed(_) => "file_processed",
            PipelineEvent::FileFailed(_) => "file_failed",
            PipelineEvent::FilePersisted(_) => "file_persisted",
        }
    }
}

// -------------------------
// Commands
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeFiles {
    pub process_id: ProcessId,
    pub file_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFile {
    pub process_id: ProcessId,
    pub file_id: FileId,
    pub file_name: String,
}

/// Analysis outcome to be written for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileOutcome {
    Completed { metrics: FileMetrics },
    Failed { error_message: String },
}

impl FileOutcome {
    pub fn status(&self) -> FileStatus {
        match self {
            FileOutcome::Completed { .. } => FileStatus::Completed,
            FileOutcome::Failed { .. } => FileStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistFileResult {
    pub process_id: ProcessId,
    pub file_id: FileId,
    pub file_name: String,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProcessStatus {
    pub process_id: ProcessId,
    pub new_status: ProcessStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineCommand {
    InitializeFiles(InitializeFiles),
    ProcessFile(ProcessFile),
    PersistFileResult(PersistFileResult),
    UpdateProcessStatus(UpdateProcessStatus),
}

impl PipelineCommand {
    pub fn correlation_id(&self) -> ProcessId {
        match self {
            PipelineCommand::InitializeFiles(c) => c.process_id,
            PipelineCommand::ProcessFile(c) => c.process_id,
            PipelineCommand::PersistFileResult(c) => c.process_id,
            PipelineCommand::UpdateProcessStatus(c) => c.process_id,
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            PipelineCommand::InitializeFiles(_) => "initialize_files",
            PipelineCommand::ProcessFile(_) => "process_file",
            PipelineCommand::PersistFileResult(_) => "persist_file_result",
            PipelineCommand::UpdateProcessStatus(_) => "update_process_status",
        }
    }
}

/// Anything that can be routed by correlation id.
pub trait Correlated {
    fn correlation_id(&self) -> ProcessId;
    fn message_type(&self) -> &'static str;
}

impl Correlated for PipelineEvent {
    fn correlation_id(&self) -> ProcessId {
        PipelineEvent::correlation_id(self)
    }

    fn message_type(&self) -> &'static str {
        PipelineEvent::message_type(self)
    }
}

impl Correlated for PipelineCommand {
    fn correlation_id(&self) -> ProcessId {
        PipelineCommand::correlation_id(self)
    }

    fn message_type(&self) -> &'static str {
        PipelineCommand::message_type(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let ev = PipelineEvent::FilePersisted(FilePersisted {
            process_id: ProcessId::new(),
            file_id: FileId::new(),
            file_name: "a.txt".into(),
            status: FileStatus::Failed,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "file_persisted");
        assert_eq!(json["status"], "FAILED");
    }

    #[test]
    fn outcome_carries_its_status() {
        let cmd = PersistFileResult {
            process_id: ProcessId::new(),
            file_id: FileId::new(),
            file_name: "a.txt".into(),
            outcome: FileOutcome::Failed {
                error_message: "File not found: a.txt".into(),
            },
        };
        assert_eq!(cmd.outcome.status(), FileStatus::Failed);

        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["outcome"]["status"], "FAILED");
    }

    #[test]
    fn correlation_id_is_the_process_id() {
        let process_id = ProcessId::new();
        let cmd = PipelineCommand::UpdateProcessStatus(UpdateProcessStatus {
            process_id,
            new_status: ProcessStatus::Running,
            reason: None,
        });
        assert_eq!(Correlated::correlation_id(&cmd), process_id);
        assert_eq!(cmd.message_type(), "update_process_status");
    }
}
