use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use docproc_core::ProcessId;

use crate::app::dto::{
    MessageResponse, ProcessResultsResponse, ProcessStatusResponse, ProcessSummary, StartProcessRequest,
    StartProcessResponse,
};
use crate::app::errors;
use crate::app::services::{AppServices, ServiceError};

fn parse_id(raw: &str) -> Result<ProcessId, axum::response::Response> {
    raw.parse::<ProcessId>()
        .map_err(|e| errors::error_to_response(ServiceError::from(e)))
}

pub async fn start(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<StartProcessRequest>,
) -> axum::response::Response {
    match services.start_process(req.into_documents()).await {
        Ok(process_id) => (
            StatusCode::CREATED,
            Json(StartProcessResponse {
                process_id,
                message: "Process started successfully",
            }),
        )
            .into_response(),
        Err(e) => errors::error_to_response(e),
    }
}

pub async fn stop(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let process_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.stop_process(process_id).await {
        Ok(()) => Json(MessageResponse {
            message: "Process stopped successfully",
        })
        .into_response(),
        Err(e) => errors::error_to_response(e),
    }
}

pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let process_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.process_status(process_id).await {
        Ok((process, progress)) => Json(ProcessStatusResponse::new(&process, progress)).into_response(),
        Err(e) => errors::error_to_response(e),
    }
}

pub async fn list(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.list_processes().await {
        Ok(processes) => {
            let summaries: Vec<ProcessSummary> = processes.iter().map(ProcessSummary::from).collect();
            Json(summaries).into_response()
        }
        Err(e) => errors::error_to_response(e),
    }
}

pub async fn results(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let process_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.process_results(process_id).await {
        Ok((process, results)) => Json(ProcessResultsResponse {
            process_id: process.id,
            status: process.status,
            results,
        })
        .into_response(),
        Err(e) => errors::error_to_response(e),
    }
}
