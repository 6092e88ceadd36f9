//! Handlers for the `/api/jobs` resource: polling, history, cancellation and
//! artifact downloads.

use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use lumina_core::error::CoreError;
use lumina_core::job::{Job, JobStatus, Progress};
use lumina_core::types::{JobId, Timestamp};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Polling view of one job.
#[derive(Debug, Serialize)]
pub struct JobDetail {
    pub job_id: JobId,
    pub property_id: String,
    pub status: JobStatus,
    pub progress: Progress,
    pub files: Option<Vec<String>>,
    /// Archive file name, downloadable through the download endpoint.
    pub archive: Option<String>,
    pub error: Option<String>,
    pub created_at: Timestamp,
}

impl From<Job> for JobDetail {
    fn from(job: Job) -> Self {
        let archive = job.archive_name();
        Self {
            job_id: job.id,
            property_id: job.property_id,
            status: job.status,
            progress: job.progress,
            files: job.files,
            archive,
            error: job.error_message,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub job_id: JobId,
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a path id. Malformed ids are reported as unknown jobs.
fn parse_job_id(raw: &str) -> AppResult<JobId> {
    raw.parse::<JobId>()
        .map_err(|_| AppError::Core(CoreError::job_not_found(raw)))
}

async fn find_job(state: &AppState, raw_id: &str) -> AppResult<Job> {
    let job_id = parse_job_id(raw_id)?;
    state
        .scheduler
        .get(job_id)
        .await
        .ok_or_else(|| AppError::Core(CoreError::job_not_found(job_id)))
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, &job_id).await?;
    Ok(Json(DataResponse {
        data: JobDetail::from(job),
    }))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/jobs
///
/// Every job since startup, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.scheduler.list().await;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/jobs/{id}/cancel
///
/// Idempotent and always acknowledged as `canceled`. Finished jobs keep
/// their own status, visible through `GET /api/jobs/{id}`.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&job_id)?;
    let status = state.scheduler.cancel(job_id).await?;
    Ok(Json(DataResponse {
        data: CancelResult { job_id, status },
    }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/jobs/{id}/download/{filename}
///
/// Streams one of the job's declared outputs or its archive. Any other name
/// is refused, which also rules out path traversal.
pub async fn download_file(
    State(state): State<AppState>,
    Path((job_id, file_name)): Path<(String, String)>,
) -> AppResult<Response> {
    let job = find_job(&state, &job_id).await?;

    if !job.is_downloadable(&file_name) {
        tracing::warn!(job_id = %job.id, file_name = %file_name, "Download of undeclared file refused");
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "'{file_name}' is not an output of this job"
        ))));
    }

    let path = job.output_dir.join(&file_name);
    let file_size = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "File",
                id: file_name,
            }))
        }
    };

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let stream = ReaderStream::new(file);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&file_name))
        .header(header::CONTENT_LENGTH, file_size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", attachment_name(&path)),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

/// Quote-safe name for the `Content-Disposition` header.
fn attachment_name(path: &FsPath) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().replace(['"', '\\'], "_"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("villa_9x16.MP4"), "video/mp4");
        assert_eq!(content_type_for("villa_output.zip"), "application/zip");
        assert_eq!(content_type_for("notes"), "application/octet-stream");
    }

    #[test]
    fn malformed_id_is_not_found() {
        let err = parse_job_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, AppError::Core(CoreError::NotFound { .. })));
    }
}
