use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Messages the pipeline gave up on, oldest first.
pub async fn dead_letters(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.dead_letters())
}
