use std::collections::HashMap;
use std::sync::RwLock;

use docproc_core::{FileId, ProcessId};
use docproc_processing::{File, Process};

use super::{ProcessRepository, RepositoryError};

fn poisoned() -> RepositoryError {
    RepositoryError::Backend("in-memory repository lock poisoned".to_string())
}

/// In-memory process/file repository.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryProcessRepository {
    processes: RwLock<HashMap<ProcessId, Process>>,
    files: RwLock<HashMap<FileId, File>>,
}

impl InMemoryProcessRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProcessRepository for InMemoryProcessRepository {
    async fn create_process(&self, process: &Process) -> Result<(), RepositoryError> {
        let mut map = self.processes.write().map_err(|_| poisoned())?;
        if map.contains_key(&process.id) {
            return Err(RepositoryError::Conflict(format!("process {} already exists", process.id)));
        }
        map.insert(process.id, process.clone());
        Ok(())
    }

    async fn get_process(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError> {
        let map = self.processes.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn update_process(&self, process: &Process) -> Result<(), RepositoryError> {
        let mut map = self.processes.write().map_err(|_| poisoned())?;
        match map.get_mut(&process.id) {
            Some(slot) => {
                *slot = process.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("process {}", process.id))),
        }
    }

    async fn list_processes(&self) -> Result<Vec<Process>, RepositoryError> {
        let map = self.processes.read().map_err(|_| poisoned())?;
        let mut all: Vec<Process> = map.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(all)
    }

    async fn delete_process(&self, id: ProcessId) -> Result<bool, RepositoryError> {
        let removed = self.processes.write().map_err(|_| poisoned())?.remove(&id).is_some();
        if removed {
            self.files
                .write()
                .map_err(|_| poisoned())?
                .retain(|_, f| f.process_id != id);
        }
        Ok(removed)
    }

    async fn create_files(&self, files: &[File]) -> Result<(), RepositoryError> {
        {
            let processes = self.processes.read().map_err(|_| poisoned())?;
            if let Some(orphan) = files.iter().find(|f| !processes.contains_key(&f.process_id)) {
                return Err(RepositoryError::NotFound(format!("process {}", orphan.process_id)));
            }
        }

        let mut map = self.files.write().map_err(|_| poisoned())?;
        if let Some(dup) = files.iter().find(|f| map.contains_key(&f.id)) {
            return Err(RepositoryError::Conflict(format!("file {} already exists", dup.id)));
        }
        for f in files {
            map.insert(f.id, f.clone());
        }
        Ok(())
    }

    async fn get_file(&self, id: FileId) -> Result<Option<File>, RepositoryError> {
        let map = self.files.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn get_files_by_process(&self, process_id: ProcessId) -> Result<Vec<File>, RepositoryError> {
        let map = self.files.read().map_err(|_| poisoned())?;
        let mut files: Vec<File> = map
            .values()
            .filter(|f| f.process_id == process_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(files)
    }

    async fn update_file(&self, file: &File) -> Result<(), RepositoryError> {
        let mut map = self.files.write().map_err(|_| poisoned())?;
        match map.get_mut(&file.id) {
            Some(slot) => {
                *slot = file.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("file {}", file.id))),
        }
    }
}
