//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                          -> list_jobs
/// GET    /{id}                      -> get_job
/// POST   /{id}/cancel               -> cancel_job
/// GET    /{id}/download/{filename}  -> download_file
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/download/{filename}", get(jobs::download_file))
}
