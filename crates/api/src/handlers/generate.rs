//! Handler for job submission (`POST /api/generate`).
//!
//! Accepts a multipart form:
//!
//! | Field         | Kind                     | Notes                        |
//! |---------------|--------------------------|------------------------------|
//! | `images`      | file, repeatable         | 1 to 20 files, order kept    |
//! | `music`       | file, optional           | at most one                  |
//! | `propertyId`  | text, optional           | defaults to `prop`           |
//! | `settings`    | JSON object text         | defaults to `{}`             |
//! | `textOverlay` | JSON text                | defaults to `{}`             |
//!
//! Uploads are written to the job's input directory as they arrive; if the
//! submission is rejected they are removed again.

use std::path::PathBuf;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use lumina_core::error::CoreError;
use lumina_core::job::NewJob;
use lumina_core::types::JobId;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Maximum number of images accepted per job.
pub const MAX_IMAGES: usize = 20;

/// Maximum number of music files accepted per job.
pub const MAX_MUSIC_FILES: usize = 1;

/// Settings key carrying the uploaded music path.
const SETTINGS_MUSIC_KEY: &str = "musicFile";

/// Settings key carrying the text overlay description.
const SETTINGS_TEXT_OVERLAY_KEY: &str = "textOverlay";

#[derive(Debug, Serialize)]
pub struct CreatedJob {
    pub job_id: JobId,
}

/// POST /api/generate
///
/// Store the uploads and queue a new job. Returns 201 with the job id.
pub async fn create_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let job_id = state.scheduler.allocate_id().await;

    let submitted = async {
        let input = read_submission(&state, job_id, multipart).await?;
        let job = state.scheduler.submit(job_id, input).await?;
        Ok::<_, AppError>(job)
    }
    .await;

    match submitted {
        Ok(job) => Ok((
            StatusCode::CREATED,
            Json(DataResponse {
                data: CreatedJob { job_id: job.id },
            }),
        )),
        Err(e) => {
            tracing::info!(%job_id, error = %e, "Submission rejected");
            state.store.remove_uploads(job_id).await;
            Err(e)
        }
    }
}

/// Walk the multipart fields, saving files and collecting text parts.
async fn read_submission(
    state: &AppState,
    job_id: JobId,
    mut multipart: Multipart,
) -> AppResult<NewJob> {
    let mut images: Vec<PathBuf> = Vec::new();
    let mut music: Option<PathBuf> = None;
    let mut property_id: Option<String> = None;
    let mut settings = Map::new();
    let mut text_overlay = Value::Object(Map::new());

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "images" => {
                if images.len() >= MAX_IMAGES {
                    return Err(AppError::Core(CoreError::Validation(format!(
                        "At most {MAX_IMAGES} images are allowed per job"
                    ))));
                }
                // The index prefix keeps same-named photos apart.
                let stored_name = format!("{:02}_{}", images.len(), field.file_name().unwrap_or("image"));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                images.push(state.store.save_upload(job_id, &stored_name, &data).await?);
            }
            "music" => {
                if music.is_some() {
                    return Err(AppError::Core(CoreError::Validation(format!(
                        "At most {MAX_MUSIC_FILES} music file is allowed per job"
                    ))));
                }
                let stored_name = format!("music_{}", field.file_name().unwrap_or("track"));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                music = Some(state.store.save_upload(job_id, &stored_name, &data).await?);
            }
            "propertyId" => {
                property_id = Some(read_text(field).await?);
            }
            "settings" => {
                settings = parse_settings(&read_text(field).await?)?;
            }
            "textOverlay" => {
                text_overlay = parse_json_field("textOverlay", &read_text(field).await?)?;
            }
            _ => {} // ignore unknown fields
        }
    }

    if images.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "At least one image is required".into(),
        )));
    }

    if let Some(music) = &music {
        settings.insert(
            SETTINGS_MUSIC_KEY.to_string(),
            Value::String(music.to_string_lossy().into_owned()),
        );
    }
    settings.insert(SETTINGS_TEXT_OVERLAY_KEY.to_string(), text_overlay);

    Ok(NewJob {
        input_images: images,
        settings: Value::Object(settings),
        property_id,
        output_dir: state.store.output_dir(job_id),
    })
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Parse the `settings` field, which must be a JSON object. Blank means `{}`.
fn parse_settings(raw: &str) -> AppResult<Map<String, Value>> {
    match parse_json_field("settings", raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Core(CoreError::Validation(
            "Field 'settings' must be a JSON object".into(),
        ))),
    }
}

/// Parse a JSON text field. Blank means `{}`.
fn parse_json_field(field: &str, raw: &str) -> AppResult<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw)
        .map_err(|e| AppError::BadRequest(format!("Field '{field}' is not valid JSON: {e}")))
}
