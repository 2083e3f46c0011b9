//! Per-file analysis stage.
//!
//! Reads the document, runs the text analyzer on the blocking pool and reports
//! the outcome. Every per-file problem becomes a `FileFailed` event with a
//! prefixed message; only repository and transport failures fail the
//! delivery itself.

use std::sync::Arc;

use tracing::{debug, error, info};

use docproc_analysis::{TextAnalysis, TextAnalyzer};
use docproc_core::ProcessId;
use docproc_events::{
    EventBus, FileFailed, FileProcessed, PipelineCommand, PipelineEvent, ProcessFile,
    UpdateProcessStatus,
};
use docproc_processing::{FileMetrics, ProcessStatus};

use crate::repository::ProcessRepository;
use crate::workers::MessageHandler;

use super::StageError;
use super::documents::{DocumentError, DocumentStore};

const STAGE: &str = "analyzer";

pub const RUNNING_REASON: &str = "First file processing started or file processing in progress.";

/// Why a single file could not be analyzed.
#[derive(Debug)]
enum FileProblem {
    InvalidInput(String),
    NotFound(String),
    Processing(String),
    Unexpected(String),
}

impl FileProblem {
    fn message(&self) -> String {
        match self {
            FileProblem::InvalidInput(m) => format!("Invalid input: {m}"),
            FileProblem::NotFound(m) => format!("File not found: {m}"),
            FileProblem::Processing(m) => format!("Processing error: {m}"),
            FileProblem::Unexpected(m) => format!("Unexpected error: {m}"),
        }
    }
}

impl From<DocumentError> for FileProblem {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::InvalidName(_) => FileProblem::InvalidInput(err.to_string()),
            DocumentError::NotFound(path) => FileProblem::NotFound(path),
            DocumentError::Io { .. } => FileProblem::Processing(err.to_string()),
        }
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

pub fn metrics_from(analysis: TextAnalysis) -> FileMetrics {
    FileMetrics {
        word_count: saturating_u32(analysis.word_count),
        line_count: saturating_u32(analysis.line_count),
        character_count: saturating_u32(analysis.character_count),
        top_words: analysis.top_words,
        summary: analysis.summary,
    }
}

pub struct AnalyzerStage<E, C> {
    repository: Arc<dyn ProcessRepository>,
    documents: Arc<dyn DocumentStore>,
    analyzer: Arc<TextAnalyzer>,
    events: E,
    commands: C,
}

impl<E, C> AnalyzerStage<E, C>
where
    E: EventBus<PipelineEvent>,
    C: EventBus<PipelineCommand>,
{
    pub fn new(
        repository: Arc<dyn ProcessRepository>,
        documents: Arc<dyn DocumentStore>,
        analyzer: Arc<TextAnalyzer>,
        events: E,
        commands: C,
    ) -> Self {
        Self {
            repository,
            documents,
            analyzer,
            events,
            commands,
        }
    }

    pub async fn process_file(&self, command: ProcessFile) -> Result<(), StageError> {
        let ProcessFile {
            process_id,
            file_id,
            file_name,
        } = command;

        info!(process_id = %process_id, file_id = %file_id, file_name = %file_name, "analyzing file");

        if let Some(file) = self
            .repository
            .get_file(file_id)
            .await
            .map_err(StageError::repository(STAGE))?
        {
            if file.status.is_terminal() {
                debug!(file_id = %file_id, status = %file.status, "file already has an outcome");
                return Ok(());
            }
        }

        let outcome = match self.prepare(process_id, &file_name).await? {
            Err(problem) => Err(problem),
            Ok(()) => self.analyze(process_id, &file_name).await,
        };

        let event = match outcome {
            Ok(metrics) => {
                info!(
                    process_id = %process_id,
                    file_id = %file_id,
                    words = metrics.word_count,
                    lines = metrics.line_count,
                    characters = metrics.character_count,
                    "file analyzed"
                );
                PipelineEvent::FileProcessed(FileProcessed {
                    process_id,
                    file_id,
                    file_name,
                    metrics,
                })
            }
            Err(problem) => {
                let error_message = problem.message();
                error!(process_id = %process_id, file_id = %file_id, error = %error_message, "file analysis failed");
                PipelineEvent::FileFailed(FileFailed {
                    process_id,
                    file_id,
                    file_name,
                    error_message,
                })
            }
        };

        let message_type = event.message_type();
        self.events
            .publish(event)
            .await
            .map_err(StageError::publish(STAGE, message_type))
    }

    /// Check the input and the process, and mark the process running.
    ///
    /// The outer error fails the delivery; the inner one fails the file.
    async fn prepare(
        &self,
        process_id: ProcessId,
        file_name: &str,
    ) -> Result<Result<(), FileProblem>, StageError> {
        if file_name.trim().is_empty() {
            return Ok(Err(FileProblem::InvalidInput("file name cannot be empty".to_string())));
        }

        let process = self
            .repository
            .get_process(process_id)
            .await
            .map_err(StageError::repository(STAGE))?
            .ok_or(StageError::ProcessNotFound(process_id))?;

        match process.status {
            ProcessStatus::Stopped => {
                return Ok(Err(FileProblem::Processing("process was stopped".to_string())));
            }
            status if status.is_terminal() => {
                return Ok(Err(FileProblem::Processing(format!("process is already {status}"))));
            }
            ProcessStatus::Pending => {
                self.commands
                    .publish(PipelineCommand::UpdateProcessStatus(UpdateProcessStatus {
                        process_id,
                        new_status: ProcessStatus::Running,
                        reason: Some(RUNNING_REASON.to_string()),
                    }))
                    .await
                    .map_err(StageError::publish(STAGE, "update_process_status"))?;
            }
            _ => {}
        }
        Ok(Ok(()))
    }

    async fn analyze(&self, process_id: ProcessId, file_name: &str) -> Result<FileMetrics, FileProblem> {
        let content = self.documents.read(process_id, file_name).await?;

        let analyzer = self.analyzer.clone();
        let analysis = tokio::task::spawn_blocking(move || analyzer.analyze(&content))
            .await
            .map_err(|e| FileProblem::Unexpected(format!("analysis task failed: {e}")))?;
        Ok(metrics_from(analysis))
    }
}

#[async_trait::async_trait]
impl<E, C> MessageHandler<PipelineCommand> for AnalyzerStage<E, C>
where
    E: EventBus<PipelineEvent> + 'static,
    C: EventBus<PipelineCommand> + 'static,
{
    type Error = StageError;

    async fn handle(&self, message: PipelineCommand) -> Result<(), Self::Error> {
        match message {
            PipelineCommand::ProcessFile(command) => self.process_file(command).await,
            _ => Ok(()),
        }
    }
}
