//! Artifact store: job-scoped upload and output directories on local disk.
//!
//! ```text
//! {uploads_root}/{job_id}/{image files, music file}
//! {outputs_root}/{job_id}/{rendered videos, archive}
//! ```

use std::path::{Component, Path, PathBuf};

use crate::types::JobId;

/// Name used when an uploaded file arrives without a usable name.
const FALLBACK_UPLOAD_NAME: &str = "upload.bin";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Filesystem roots for uploaded inputs and generated outputs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    uploads_root: PathBuf,
    outputs_root: PathBuf,
}

impl ArtifactStore {
    pub fn new(uploads_root: impl Into<PathBuf>, outputs_root: impl Into<PathBuf>) -> Self {
        Self {
            uploads_root: uploads_root.into(),
            outputs_root: outputs_root.into(),
        }
    }

    /// Create both roots if they do not exist yet.
    pub async fn ensure_roots(&self) -> Result<(), StorageError> {
        for root in [&self.uploads_root, &self.outputs_root] {
            create_dir(root).await?;
        }
        Ok(())
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads_root
    }

    pub fn outputs_root(&self) -> &Path {
        &self.outputs_root
    }

    pub fn upload_dir(&self, job_id: JobId) -> PathBuf {
        self.uploads_root.join(job_id.to_string())
    }

    pub fn output_dir(&self, job_id: JobId) -> PathBuf {
        self.outputs_root.join(job_id.to_string())
    }

    /// Persist one uploaded file under the job's input directory and return
    /// its path. A later upload with the same name replaces the earlier one.
    pub async fn save_upload(
        &self,
        job_id: JobId,
        original_name: &str,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.upload_dir(job_id);
        create_dir(&dir).await?;

        let path = dir.join(sanitize_file_name(original_name, FALLBACK_UPLOAD_NAME));
        tokio::fs::write(&path, data)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(%job_id, path = %path.display(), bytes = data.len(), "Upload stored");
        Ok(path)
    }

    /// Create a job's output directory (idempotent).
    pub async fn create_output_dir(&self, path: &Path) -> Result<(), StorageError> {
        create_dir(path).await
    }

    /// Best-effort removal of a job's uploads, used when a submission is
    /// rejected after some files were already written.
    pub async fn remove_uploads(&self, job_id: JobId) {
        let dir = self.upload_dir(job_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(%job_id, error = %e, "Failed to remove rejected uploads");
            }
        }
    }
}

async fn create_dir(path: &Path) -> Result<(), StorageError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| StorageError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Reduce a client-supplied name to a single safe path component.
///
/// Directory parts are stripped, characters outside `[A-Za-z0-9._ -]` become
/// `_`, and names that end up empty or consist only of dots fall back to
/// `fallback`.
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Whether `name` is a bare file name with no directory components.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('\\')
}
