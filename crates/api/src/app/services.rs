//! Application services behind the HTTP handlers.
//!
//! Handlers stay thin: they parse input, call one method here and map the
//! result. Everything that touches the pipeline goes through [`AppServices`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use docproc_core::{DomainError, ProcessId};
use docproc_events::{EventBus, PipelineEvent, ProcessStarted};
use docproc_infra::repository::{ProcessRepository, RepositoryError};
use docproc_infra::stages::{DocumentError, DocumentStore, StageError, validate_name};
use docproc_infra::workers::DeadLetter;
use docproc_infra::{Pipeline, PipelineConfig, PipelineStores, StartupError};
use docproc_processing::{File, Process, ProcessResults, Progress, StatusChange, estimate};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidId(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Infrastructure(String),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(m) => ServiceError::Validation(m),
            DomainError::InvalidId(m) => ServiceError::InvalidId(m),
            DomainError::NotFound(m) => ServiceError::NotFound(m),
            DomainError::Conflict(m) => ServiceError::Conflict(m),
            DomainError::InvariantViolation(m) => ServiceError::Infrastructure(m),
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(m) => ServiceError::NotFound(m),
            RepositoryError::Conflict(m) => ServiceError::Conflict(m),
            other => ServiceError::Infrastructure(other.to_string()),
        }
    }
}

impl From<DocumentError> for ServiceError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::InvalidName(_) => ServiceError::Validation(err.to_string()),
            other => ServiceError::Infrastructure(other.to_string()),
        }
    }
}

impl From<StageError> for ServiceError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::ProcessNotFound(id) => ServiceError::NotFound(format!("process {id} not found")),
            StageError::Domain(e) => e.into(),
            other => ServiceError::Infrastructure(other.to_string()),
        }
    }
}

/// One uploaded document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub content: String,
}

/// Shared services injected into handlers via `Extension`.
pub struct AppServices {
    pipeline: Arc<Pipeline>,
}

impl AppServices {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Register a process, upload its documents and hand it to the pipeline.
    ///
    /// Every name is checked before anything is stored. If a later step
    /// fails, the documents uploaded so far are discarded.
    pub async fn start_process(&self, documents: Vec<NewDocument>) -> Result<ProcessId, ServiceError> {
        if documents.is_empty() {
            return Err(ServiceError::Validation("At least one file is required".to_string()));
        }
        let mut seen = HashSet::new();
        for doc in &documents {
            validate_name(&doc.name)?;
            if !seen.insert(doc.name.as_str()) {
                return Err(ServiceError::Validation(format!("duplicate file name '{}'", doc.name)));
            }
        }

        let process = Process::new(ProcessId::new(), documents.len() as u32, Utc::now());
        let file_names: Vec<String> = documents.iter().map(|d| d.name.clone()).collect();

        if let Err(err) = self.register(&process, documents).await {
            self.abandon(process.id).await;
            return Err(err);
        }

        let started = PipelineEvent::ProcessStarted(ProcessStarted {
            process_id: process.id,
            file_names,
        });
        if let Err(e) = self.pipeline.events().publish(started).await {
            self.abandon(process.id).await;
            return Err(ServiceError::Infrastructure(e.to_string()));
        }

        info!(process_id = %process.id, total_files = process.total_files, "process started");
        Ok(process.id)
    }

    async fn register(&self, process: &Process, documents: Vec<NewDocument>) -> Result<(), ServiceError> {
        let store = self.pipeline.documents();
        for doc in &documents {
            store.store(process.id, &doc.name, &doc.content).await?;
        }
        self.pipeline.repository().create_process(process).await?;
        Ok(())
    }

    /// Undo a partial start: drop uploaded documents and the process record.
    async fn abandon(&self, process_id: ProcessId) {
        match self.pipeline.documents().discard(process_id).await {
            Ok(removed) => warn!(process_id = %process_id, removed, "start failed; documents discarded"),
            Err(e) => error!(process_id = %process_id, error = %e, "start failed; cannot discard documents"),
        }
        if let Err(e) = self.pipeline.repository().delete_process(process_id).await {
            error!(process_id = %process_id, error = %e, "start failed; cannot delete process record");
        }
    }

    pub async fn stop_process(&self, process_id: ProcessId) -> Result<(), ServiceError> {
        match self.pipeline.stop_process(process_id).await? {
            StatusChange::Applied => {
                info!(process_id = %process_id, "process stopped");
                Ok(())
            }
            StatusChange::AlreadyTerminal(status) => Err(ServiceError::Conflict(format!(
                "process {process_id} is already finished ({status})"
            ))),
            StatusChange::Unchanged => Err(ServiceError::Conflict(format!(
                "process {process_id} is already stopped"
            ))),
        }
    }

    pub async fn process_status(&self, process_id: ProcessId) -> Result<(Process, Progress), ServiceError> {
        let (process, files) = self.load(process_id).await?;
        let progress = estimate(&process, &files, Utc::now());
        Ok((process, progress))
    }

    pub async fn list_processes(&self) -> Result<Vec<Process>, ServiceError> {
        Ok(self.pipeline.repository().list_processes().await?)
    }

    pub async fn process_results(&self, process_id: ProcessId) -> Result<(Process, ProcessResults), ServiceError> {
        let (process, files) = self.load(process_id).await?;
        let results = ProcessResults::for_process(&process, &files)?;
        Ok((process, results))
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.pipeline.dead_letters().all()
    }

    async fn load(&self, process_id: ProcessId) -> Result<(Process, Vec<File>), ServiceError> {
        let repo = self.pipeline.repository();
        let process = repo
            .get_process(process_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("process {process_id} not found")))?;
        let files = repo.get_files_by_process(process_id).await?;
        Ok((process, files))
    }
}

/// Start the pipeline on the stores the config selects.
pub async fn build_services(config: &PipelineConfig) -> Result<AppServices, StartupError> {
    let stores = PipelineStores::from_config(config).await?;
    let pipeline = Arc::new(Pipeline::start(config, stores));
    Ok(AppServices::new(pipeline))
}
