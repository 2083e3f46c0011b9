use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docproc_core::ProcessId;
use docproc_processing::{Process, ProcessResults, ProcessStatus, Progress};

use crate::app::services::NewDocument;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct StartProcessRequest {
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

impl StartProcessRequest {
    pub fn into_documents(self) -> Vec<NewDocument> {
        self.files
            .into_iter()
            .map(|f| NewDocument {
                name: f.name,
                content: f.content,
            })
            .collect()
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StartProcessResponse {
    pub process_id: ProcessId,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProgressDto {
    pub total_files: u32,
    pub processed_files: u32,
    pub percentage: u32,
}

#[derive(Debug, Serialize)]
pub struct ProcessStatusResponse {
    pub process_id: ProcessId,
    pub status: ProcessStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub progress: ProgressDto,
}

impl ProcessStatusResponse {
    pub fn new(process: &Process, progress: Progress) -> Self {
        Self {
            process_id: process.id,
            status: process.status,
            started_at: process.started_at,
            estimated_completion: progress.estimated_completion,
            progress: ProgressDto {
                total_files: progress.total_files,
                processed_files: progress.processed_files,
                percentage: progress.percentage,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessSummary {
    pub process_id: ProcessId,
    pub status: ProcessStatus,
    pub total_files: u32,
    pub completed_files: u32,
    pub failed_files: u32,
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Process> for ProcessSummary {
    fn from(p: &Process) -> Self {
        Self {
            process_id: p.id,
            status: p.status,
            total_files: p.total_files,
            completed_files: p.completed_files,
            failed_files: p.failed_files,
            reason: p.reason.clone(),
            started_at: p.started_at,
            completed_at: p.completed_at,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessResultsResponse {
    pub process_id: ProcessId,
    pub status: ProcessStatus,
    pub results: ProcessResults,
}
