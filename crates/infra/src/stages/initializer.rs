use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use docproc_core::ProcessId;
use docproc_events::{EventBus, FileReady, InitializeFiles, PipelineCommand, PipelineEvent};
use docproc_processing::File;

use crate::locks::KeyedLocks;
use crate::repository::ProcessRepository;
use crate::workers::MessageHandler;

use super::StageError;

const STAGE: &str = "initializer";

/// Creates the file records of a process and announces each file.
///
/// Redelivery reuses the records created the first time, so every file keeps
/// one id across repeated `FileReady` events.
pub struct InitializerStage<E> {
    repository: Arc<dyn ProcessRepository>,
    events: E,
    locks: KeyedLocks<ProcessId>,
}

impl<E> InitializerStage<E>
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

    pub async fn initialize(&self, command: InitializeFiles) -> Result<Vec<File>, StageError> {
        let process_id = command.process_id;
        let guard = self.locks.lock(&process_id).await;
        let result = self.initialize_locked(command).await;
        drop(guard);
        self.locks.prune(&process_id);
        result
    }

    async fn initialize_locked(&self, command: InitializeFiles) -> Result<Vec<File>, StageError> {
        let process_id = command.process_id;
        self.repository
            .get_process(process_id)
            .await
            .map_err(StageError::repository(STAGE))?
            .ok_or(StageError::ProcessNotFound(process_id))?;

        let existing = self
            .repository
            .get_files_by_process(process_id)
            .await
            .map_err(StageError::repository(STAGE))?;

        let files = if existing.is_empty() {
            let now = Utc::now();
            let files: Vec<File> = command
                .file_names
                .iter()
                .map(|name| File::pending(process_id, name.as_str(), now))
                .collect();
            self.repository
                .create_files(&files)
                .await
                .map_err(StageError::repository(STAGE))?;
            info!(process_id = %process_id, file_count = files.len(), "files initialized");
            files
        } else {
            debug!(process_id = %process_id, file_count = existing.len(), "files already initialized");
            existing
        };

        for file in &files {
            self.events
                .publish(PipelineEvent::FileReady(FileReady {
                    process_id,
                    file_id: file.id,
                    file_name: file.file_name.clone(),
                }))
                .await
                .map_err(StageError::publish(STAGE, "file_ready"))?;
        }
        Ok(files)
    }
}

#[async_trait::async_trait]
impl<E> MessageHandler<PipelineCommand> for InitializerStage<E>
where
    E: EventBus<PipelineEvent> + 'static,
{
    type Error = StageError;

    async fn handle(&self, message: PipelineCommand) -> Result<(), Self::Error> {
        match message {
            PipelineCommand::InitializeFiles(command) => self.initialize(command).await.map(|_| ()),
            _ => Ok(()),
        }
    }
}
