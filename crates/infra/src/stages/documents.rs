//! Access to uploaded document contents.
//!
//! Documents are addressed by `(process_id, file_name)`. The filesystem store
//! keeps them at `<root>/<process_id>/<file_name>`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

use docproc_core::ProcessId;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid document name '{0}'")]
    InvalidName(String),

    #[error("{0}")]
    NotFound(String),

    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, process_id: ProcessId, file_name: &str) -> Result<String, DocumentError>;

    async fn store(&self, process_id: ProcessId, file_name: &str, content: &str) -> Result<(), DocumentError>;

    /// Remove every document stored for `process_id`. Returns how many were removed.
    async fn discard(&self, process_id: ProcessId) -> Result<usize, DocumentError>;
}

/// A bare file name: no separators, no `.`/`..`.
pub fn validate_name(file_name: &str) -> Result<(), DocumentError> {
    let valid = !file_name.trim().is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(DocumentError::InvalidName(file_name.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<(ProcessId, String), String>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> DocumentError {
        DocumentError::Io {
            path: "<memory>".to_string(),
            source: io::Error::other("document store lock poisoned"),
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn read(&self, process_id: ProcessId, file_name: &str) -> Result<String, DocumentError> {
        validate_name(file_name)?;
        let docs = self.documents.read().map_err(|_| Self::poisoned())?;
        docs.get(&(process_id, file_name.to_string()))
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(format!("{process_id}/{file_name}")))
    }

    async fn store(&self, process_id: ProcessId, file_name: &str, content: &str) -> Result<(), DocumentError> {
        validate_name(file_name)?;
        let mut docs = self.documents.write().map_err(|_| Self::poisoned())?;
        docs.insert((process_id, file_name.to_string()), content.to_string());
        Ok(())
    }

    async fn discard(&self, process_id: ProcessId) -> Result<usize, DocumentError> {
        let mut docs = self.documents.write().map_err(|_| Self::poisoned())?;
        let before = docs.len();
        docs.retain(|(pid, _), _| *pid != process_id);
        Ok(before - docs.len())
    }
}

#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, process_id: ProcessId, file_name: &str) -> Result<PathBuf, DocumentError> {
        validate_name(file_name)?;
        Ok(self.root.join(process_id.to_string()).join(file_name))
    }
}

fn io_error(path: &Path, source: io::Error) -> DocumentError {
    let path = path.display().to_string();
    if source.kind() == io::ErrorKind::NotFound {
        DocumentError::NotFound(path)
    } else {
        DocumentError::Io { path, source }
    }
}

#[async_trait::async_trait]
impl DocumentStore for FsDocumentStore {
    async fn read(&self, process_id: ProcessId, file_name: &str) -> Result<String, DocumentError> {
        let path = self.path_for(process_id, file_name)?;
        debug!(path = %path.display(), "reading document");
        tokio::fs::read_to_string(&path).await.map_err(|e| io_error(&path, e))
    }

    async fn store(&self, process_id: ProcessId, file_name: &str, content: &str) -> Result<(), DocumentError> {
        let path = self.path_for(process_id, file_name)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| io_error(dir, e))?;
        }
        tokio::fs::write(&path, content).await.map_err(|e| io_error(&path, e))
    }

    async fn discard(&self, process_id: ProcessId) -> Result<usize, DocumentError> {
        let dir = self.root.join(process_id.to_string());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(&dir, e)),
        };
        let mut removed = 0;
        while let Some(_entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            removed += 1;
        }
        tokio::fs::remove_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        debug!(path = %dir.display(), removed, "documents discarded");
        Ok(removed)
    }
}
