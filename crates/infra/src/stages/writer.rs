//! Result writer: durable file outcomes and process status.
//!
//! All writes for one process are serialized. Outcomes are write-once; a
//! redelivered `PersistFileResult` re-announces whatever was stored first.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use docproc_core::{DomainError, ProcessId};
use docproc_events::{
    EventBus, FileOutcome, FilePersisted, PersistFileResult, PipelineCommand, PipelineEvent,
    UpdateProcessStatus,
};
use docproc_processing::{FileCounts, Process, StatusChange};

use crate::locks::KeyedLocks;
use crate::repository::ProcessRepository;
use crate::workers::MessageHandler;

use super::StageError;

const STAGE: &str = "writer";

pub struct WriterStage<E> {
    repository: Arc<dyn ProcessRepository>,
    events: E,
    locks: KeyedLocks<ProcessId>,
}

impl<E> WriterStage<E>
where
    E: EventBus<PipelineEvent>,
{
    pub fn new(repository: Arc<dyn ProcessRepository>, events: E) -> Self {
        Self {
            repository,
            events,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn persist_result(&self, command: PersistFileResult) -> Result<(), StageError> {
        let process_id = command.process_id;
        let guard = self.locks.lock(&process_id).await;
        let result = self.persist_locked(command).await;
        drop(guard);
        self.locks.prune(&process_id);
        result
    }

    pub async fn update_status(&self, command: UpdateProcessStatus) -> Result<StatusChange, StageError> {
        let process_id = command.process_id;
        let guard = self.locks.lock(&process_id).await;
        let result = self.update_status_locked(command).await;
        drop(guard);
        self.locks.prune(&process_id);
        result
    }

    async fn persist_locked(&self, command: PersistFileResult) -> Result<(), StageError> {
        let PersistFileResult {
            process_id,
            file_id,
            file_name,
            outcome,
        } = command;

        let mut file = self
            .repository
            .get_file(file_id)
            .await
            .map_err(StageError::repository(STAGE))?
            .ok_or(StageError::FileNotFound(file_id))?;
        if file.process_id != process_id {
            return Err(DomainError::invariant(format!(
                "file {file_id} belongs to process {}, not {process_id}",
                file.process_id
            ))
            .into());
        }

        let now = Utc::now();
        let written = match outcome {
            FileOutcome::Completed { metrics } => file.complete(metrics, now)?,
            FileOutcome::Failed { error_message } => file.fail(error_message, now),
        };

        if written {
            self.repository
                .update_file(&file)
                .await
                .map_err(StageError::repository(STAGE))?;
            self.recount(process_id).await?;
            info!(process_id = %process_id, file_id = %file_id, status = %file.status, "file result persisted");
        } else {
            debug!(process_id = %process_id, file_id = %file_id, status = %file.status, "file result already persisted");
        }

        self.events
            .publish(PipelineEvent::FilePersisted(FilePersisted {
                process_id,
                file_id,
                file_name,
                status: file.status,
            }))
            .await
            .map_err(StageError::publish(STAGE, "file_persisted"))
    }

    /// Refresh the completed/failed counters of a process from its files.
    async fn recount(&self, process_id: ProcessId) -> Result<Process, StageError> {
        let mut process = self.load_process(process_id).await?;
        let files = self
            .repository
            .get_files_by_process(process_id)
            .await
            .map_err(StageError::repository(STAGE))?;
        process.record_counts(FileCounts::tally(&files), Utc::now())?;
        self.repository
            .update_process(&process)
            .await
            .map_err(StageError::repository(STAGE))?;
        Ok(process)
    }

    async fn update_status_locked(&self, command: UpdateProcessStatus) -> Result<StatusChange, StageError> {
        let UpdateProcessStatus {
            process_id,
            new_status,
            reason,
        } = command;

        let mut process = self.load_process(process_id).await?;
        if process.status.is_terminal() {
            info!(
                process_id = %process_id,
                current = %process.status,
                requested = %new_status,
                "process already finished; status update ignored"
            );
            return Ok(StatusChange::AlreadyTerminal(process.status));
        }

        if new_status.is_terminal() {
            process = self.recount(process_id).await?;
        }

        let change = process.transition_to(new_status, reason, Utc::now())?;
        match change {
            StatusChange::Applied => {
                self.repository
                    .update_process(&process)
                    .await
                    .map_err(StageError::repository(STAGE))?;
                info!(
                    process_id = %process_id,
                    status = %process.status,
                    completed_files = process.completed_files,
                    failed_files = process.failed_files,
                    "process status updated"
                );
            }
            StatusChange::Unchanged => {
                debug!(process_id = %process_id, status = %new_status, "process status unchanged");
            }
            StatusChange::AlreadyTerminal(current) => {
                warn!(process_id = %process_id, current = %current, "process finished concurrently");
            }
        }
        Ok(change)
    }

    async fn load_process(&self, process_id: ProcessId) -> Result<Process, StageError> {
        self.repository
            .get_process(process_id)
            .await
            .map_err(StageError::repository(STAGE))?
            .ok_or(StageError::ProcessNotFound(process_id))
    }
}

#[async_trait::async_trait]
impl<E> MessageHandler<PipelineCommand> for WriterStage<E>
where
    E: EventBus<PipelineEvent> + 'static,
{
    type Error = StageError;

    async fn handle(&self, message: PipelineCommand) -> Result<(), Self::Error> {
        match message {
            PipelineCommand::PersistFileResult(command) => self.persist_result(command).await,
            PipelineCommand::UpdateProcessStatus(command) => self.update_status(command).await.map(|_| ()),
            _ => Ok(()),
        }
    }
}
