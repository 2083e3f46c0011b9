use axum::{
    Router,
    routing::{get, post},
};

pub mod processes;
pub mod system;

/// Router for the process endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/processes", post(processes::start).get(processes::list))
        .route("/processes/:id/stop", post(processes::stop))
        .route("/processes/:id/status", get(processes::status))
        .route("/processes/:id/results", get(processes::results))
        .route("/dead-letters", get(system::dead_letters))
}
