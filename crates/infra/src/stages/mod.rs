//! Pipeline stage handlers.
//!
//! - [`InitializerStage`]: `InitializeFiles` → file records + `FileReady`
//! - [`AnalyzerStage`]: `ProcessFile` → `FileProcessed` / `FileFailed`
//! - [`WriterStage`]: `PersistFileResult` → `FilePersisted`, and `UpdateProcessStatus`
//!
//! Every stage subscribes to the command bus and ignores the commands that
//! belong to other stages.

pub mod analyzer;
pub mod documents;
pub mod initializer;
pub mod writer;

use thiserror::Error;

use docproc_core::{DomainError, FileId, ProcessId};

use crate::repository::RepositoryError;
use crate::workers::{DeliveryFailure, Disposition};

pub use analyzer::AnalyzerStage;
pub use documents::{DocumentError, DocumentStore, FsDocumentStore, InMemoryDocumentStore, validate_name};
pub use initializer::InitializerStage;
pub use writer::WriterStage;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage}: repository failed: {source}")]
    Repository {
        stage: &'static str,
        #[source]
        source: RepositoryError,
    },

    #[error("{stage}: publishing {message_type} failed: {message}")]
    Publish {
        stage: &'static str,
        message_type: &'static str,
        message: String,
    },

    #[error("process {0} not found")]
    ProcessNotFound(ProcessId),

    #[error("file {0} not found")]
    FileNotFound(FileId),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl StageError {
    pub(crate) fn repository(stage: &'static str) -> impl FnOnce(RepositoryError) -> StageError {
        move |source| StageError::Repository { stage, source }
    }

    pub(crate) fn publish<E: std::fmt::Display>(
        stage: &'static str,
        message_type: &'static str,
    ) -> impl FnOnce(E) -> StageError {
        move |e| StageError::Publish {
            stage,
            message_type,
            message: e.to_string(),
        }
    }
}

impl DeliveryFailure for StageError {
    fn disposition(&self) -> Disposition {
        match self {
            StageError::Repository { source, .. } if source.is_retryable() => Disposition::Redeliver,
            StageError::Publish { .. } => Disposition::Redeliver,
            _ => Disposition::DeadLetter,
        }
    }
}
