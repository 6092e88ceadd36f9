pub mod health;
pub mod jobs;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Plain-text banner served at `GET /api`.
pub const API_BANNER: &str = "Lumina Vids API Running";

/// Build the `/api` route tree.
///
/// ```text
/// /                                    banner (GET)
/// /generate                            submit a job (POST, multipart)
///
/// /jobs                                history (GET)
/// /jobs/{id}                           status and progress (GET)
/// /jobs/{id}/cancel                    cancel (POST)
/// /jobs/{id}/download/{filename}       output or archive download (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(api_banner))
        .route("/generate", post(handlers::generate::create_job))
        .nest("/jobs", jobs::router())
}

async fn api_banner() -> &'static str {
    API_BANNER
}
