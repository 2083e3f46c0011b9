//! Durable process/file storage.
//!
//! The pipeline stages write through [`ProcessRepository`]; the API reads
//! through it. Two implementations ship:
//!
//! - [`InMemoryProcessRepository`]: tests/dev, lost on restart
//! - [`PostgresProcessRepository`]: sqlx-backed, `ON DELETE CASCADE` from
//!   processes to files

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use thiserror::Error;

use docproc_core::{FileId, ProcessId};
use docproc_processing::{File, Process};

pub use in_memory::InMemoryProcessRepository;
pub use postgres::PostgresProcessRepository;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Connectivity or other backend failure; usually worth retrying.
    #[error("backend error: {0}")]
    Backend(String),

    /// Stored data could not be mapped back to domain types.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Backend(_))
    }
}

#[async_trait::async_trait]
pub trait ProcessRepository: Send + Sync {
    async fn create_process(&self, process: &Process) -> Result<(), RepositoryError>;

    async fn get_process(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError>;

    /// Overwrite an existing process. `NotFound` if it was never created.
    async fn update_process(&self, process: &Process) -> Result<(), RepositoryError>;

    /// All processes, newest first.
    async fn list_processes(&self) -> Result<Vec<Process>, RepositoryError>;

    /// Delete a process together with its files.
    async fn delete_process(&self, id: ProcessId) -> Result<bool, RepositoryError>;

    async fn create_files(&self, files: &[File]) -> Result<(), RepositoryError>;

    async fn get_file(&self, id: FileId) -> Result<Option<File>, RepositoryError>;

    /// Files of a process in creation order.
    async fn get_files_by_process(&self, process_id: ProcessId) -> Result<Vec<File>, RepositoryError>;

    async fn update_file(&self, file: &File) -> Result<(), RepositoryError>;
}

#[async_trait::async_trait]
impl<R> ProcessRepository for Arc<R>
where
    R: ProcessRepository + ?Sized,
{
    async fn create_process(&self, process: &Process) -> Result<(), RepositoryError> {
        (**self).create_process(process).await
    }

    async fn get_process(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError> {
        (**self).get_process(id).await
    }

    async fn update_process(&self, process: &Process) -> Result<(), RepositoryError> {
        (**self).update_process(process).await
    }

    async fn list_processes(&self) -> Result<Vec<Process>, RepositoryError> {
        (**self).list_processes().await
    }

    async fn delete_process(&self, id: ProcessId) -> Result<bool, RepositoryError> {
        (**self).delete_process(id).await
    }

    async fn create_files(&self, files: &[File]) -> Result<(), RepositoryError> {
        (**self).create_files(files).await
    }

    async fn get_file(&self, id: FileId) -> Result<Option<File>, RepositoryError> {
        (**self).get_file(id).await
    }

    async fn get_files_by_process(&self, process_id: ProcessId) -> Result<Vec<File>, RepositoryError> {
        (**self).get_files_by_process(process_id).await
    }

    async fn update_file(&self, file: &File) -> Result<(), RepositoryError> {
        (**self).update_file(file).await
    }
}
