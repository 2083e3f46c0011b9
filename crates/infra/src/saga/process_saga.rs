//! Transition rules of the document-processing saga.
//!
//! [`decide`] is pure: given the stored instance (if any) and one incoming
//! event it returns the next instance plus the commands to emit, or a reason
//! to ignore or reject the event. Persistence, publishing and locking are the
//! orchestrator's job.
//!
//! Completion is decided on written outcomes, never on analysis results:
//! the saga finishes once `persisted_files + failed_files >= total_files` and
//! no outcome write is still outstanding.

use chrono::{DateTime, Utc};
use thiserror::Error;

use docproc_core::{FileId, ProcessId};
use docproc_events::{
    FileOutcome, FileStage, InitializeFiles, PersistFileResult, PipelineCommand, PipelineEvent,
    ProcessFile, ProcessStarted, SagaPhase, SagaState, UpdateProcessStatus,
};
use docproc_processing::{FileStatus, ProcessStatus};

use crate::workers::Disposition;

pub const REASON_ALL_SUCCEEDED: &str = "All files processed successfully";
pub const REASON_NO_FILES: &str = "No files to process";

pub fn failures_reason(failed: u32) -> String {
    format!("Process completed with {failed} failures")
}

/// Result of applying one event to one saga instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do; the stored instance stays as it is.
    Ignore(IgnoreReason),
    Apply(Step),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: SagaState,
    /// Emitted in order, before `state` is stored.
    pub commands: Vec<PipelineCommand>,
    /// `state` has to be inserted rather than overwritten.
    pub is_new: bool,
    /// Set when this step moved the saga to `Completed`.
    pub finalized: Option<ProcessStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    DuplicateStart,
    /// The saga already completed; late or repeated events are inert.
    Finalized,
    DuplicateFileEvent { file_id: FileId, stage: FileStage },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no saga for process {0}")]
    UnknownSaga(ProcessId),

    /// The write was confirmed before the saga saw the outcome; redelivery
    /// after the outcome event resolves it.
    #[error("file {file_id} reported persisted before its outcome was recorded")]
    PersistedWithoutOutcome { file_id: FileId },

    #[error("file {file_id} reported persisted with non-terminal status {status}")]
    InvalidPersistedStatus { file_id: FileId, status: FileStatus },

    #[error("file {file_id} exceeds the {total_files} files of process {process_id}")]
    UnexpectedFile {
        process_id: ProcessId,
        file_id: FileId,
        total_files: u32,
    },

    #[error("malformed event: {0}")]
    Malformed(String),
}

impl Rejection {
    pub fn disposition(&self) -> Disposition {
        match self {
            Rejection::PersistedWithoutOutcome { .. } => Disposition::Redeliver,
            _ => Disposition::DeadLetter,
        }
    }
}

/// Apply `event` to `current`.
pub fn decide(
    current: Option<&SagaState>,
    event: &PipelineEvent,
    now: DateTime<Utc>,
) -> Result<Decision, Rejection> {
    if let PipelineEvent::ProcessStarted(started) = event {
        return start(current, started, now);
    }

    let current = current.ok_or_else(|| Rejection::UnknownSaga(event.correlation_id()))?;
    if current.is_finalized() {
        return Ok(Decision::Ignore(IgnoreReason::Finalized));
    }

    let mut state = current.clone();
    state.updated_at = now;

    match event {
        PipelineEvent::ProcessStarted(started) => start(Some(current), started, now),

        PipelineEvent::FileReady(e) => {
            if let Some(stage) = state.stage_of(e.file_id) {
                return Ok(duplicate(e.file_id, stage));
            }
            admit(&state, e.file_id)?;
            state.files.insert(e.file_id, FileStage::Ready);
            Ok(advance(
                state,
                vec![PipelineCommand::ProcessFile(ProcessFile {
                    process_id: e.process_id,
                    file_id: e.file_id,
                    file_name: e.file_name.clone(),
                })],
            ))
        }

        PipelineEvent::FileProcessed(e) => {
            match state.stage_of(e.file_id) {
                Some(stage) if stage.has_outcome() => return Ok(duplicate(e.file_id, stage)),
                Some(_) => {}
                None => admit(&state, e.file_id)?,
            }
            state.files.insert(e.file_id, FileStage::Processed);
            state.completed_files += 1;
            Ok(advance(
                state,
                vec![PipelineCommand::PersistFileResult(PersistFileResult {
                    process_id: e.process_id,
                    file_id: e.file_id,
                    file_name: e.file_name.clone(),
                    outcome: FileOutcome::Completed {
                        metrics: e.metrics.clone(),
                    },
                })],
            ))
        }

        PipelineEvent::FileFailed(e) => {
            match state.stage_of(e.file_id) {
                Some(stage) if stage.has_outcome() => return Ok(duplicate(e.file_id, stage)),
                Some(_) => {}
                None => admit(&state, e.file_id)?,
            }
            state.files.insert(e.file_id, FileStage::Failed);
            state.failed_files += 1;
            Ok(advance(
                state,
                vec![PipelineCommand::PersistFileResult(PersistFileResult {
                    process_id: e.process_id,
                    file_id: e.file_id,
                    file_name: e.file_name.clone(),
                    outcome: FileOutcome::Failed {
                        error_message: e.error_message.clone(),
                    },
                })],
            ))
        }

        PipelineEvent::FilePersisted(e) => {
            if !e.status.is_terminal() {
                return Err(Rejection::InvalidPersistedStatus {
                    file_id: e.file_id,
                    status: e.status,
                });
            }
            match state.stage_of(e.file_id) {
                None | Some(FileStage::Ready) => {
                    return Err(Rejection::PersistedWithoutOutcome { file_id: e.file_id });
                }
                Some(FileStage::Persisted) => return Ok(duplicate(e.file_id, FileStage::Persisted)),
                // A failed file is already represented in `failed_files`.
                Some(FileStage::Failed) => {}
                Some(FileStage::Processed) => state.persisted_files += 1,
            }
            state.files.insert(e.file_id, FileStage::Persisted);

            if state.all_files_accounted() && state.pending_writes() == 0 {
                Ok(finalize(state))
            } else {
                Ok(advance(state, Vec::new()))
            }
        }
    }
}

fn start(
    current: Option<&SagaState>,
    started: &ProcessStarted,
    now: DateTime<Utc>,
) -> Result<Decision, Rejection> {
    if current.is_some() {
        return Ok(Decision::Ignore(IgnoreReason::DuplicateStart));
    }
    let total = u32::try_from(started.file_names.len())
        .map_err(|_| Rejection::Malformed(format!("{} files", started.file_names.len())))?;
    let mut state = SagaState::new(started.process_id, total, now);

    if total == 0 {
        state.current_state = SagaPhase::Completed;
        return Ok(Decision::Apply(Step {
            commands: vec![update_status(&state, ProcessStatus::Completed, REASON_NO_FILES)],
            state,
            is_new: true,
            finalized: Some(ProcessStatus::Completed),
        }));
    }

    Ok(Decision::Apply(Step {
        commands: vec![PipelineCommand::InitializeFiles(InitializeFiles {
            process_id: started.process_id,
            file_names: started.file_names.clone(),
        })],
        state,
        is_new: true,
        finalized: None,
    }))
}

fn duplicate(file_id: FileId, stage: FileStage) -> Decision {
    Decision::Ignore(IgnoreReason::DuplicateFileEvent { file_id, stage })
}

/// A file not seen before must fit into the declared file count.
fn admit(state: &SagaState, file_id: FileId) -> Result<(), Rejection> {
    if state.files.len() >= state.total_files as usize {
        return Err(Rejection::UnexpectedFile {
            process_id: state.correlation_id,
            file_id,
            total_files: state.total_files,
        });
    }
    Ok(())
}

fn advance(state: SagaState, commands: Vec<PipelineCommand>) -> Decision {
    Decision::Apply(Step {
        state,
        commands,
        is_new: false,
        finalized: None,
    })
}

fn finalize(mut state: SagaState) -> Decision {
    state.current_state = SagaPhase::Completed;
    let (status, reason) = if state.failed_files > 0 {
        (ProcessStatus::CompletedWithFailures, failures_reason(state.failed_files))
    } else {
        (ProcessStatus::Completed, REASON_ALL_SUCCEEDED.to_string())
    };
    Decision::Apply(Step {
        commands: vec![update_status(&state, status, reason)],
        state,
        is_new: false,
        finalized: Some(status),
    })
}

fn update_status(state: &SagaState, status: ProcessStatus, reason: impl Into<String>) -> PipelineCommand {
    PipelineCommand::UpdateProcessStatus(UpdateProcessStatus {
        process_id: state.correlation_id,
        new_status: status,
        reason: Some(reason.into()),
    })
}
