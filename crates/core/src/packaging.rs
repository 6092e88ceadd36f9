//! Packaging service: bundles a finished job's outputs into one zip archive.
//!
//! Entries are stored flat under their own names and compressed with
//! Deflate at the highest level. The archive lives next to the files it
//! packages, inside the job's output directory.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::storage::{is_plain_file_name, sanitize_file_name};

/// Deflate level used for archives (maximum compression).
pub const ARCHIVE_COMPRESSION_LEVEL: i64 = 9;

/// Suffix appended to the property id to form the archive name.
const ARCHIVE_SUFFIX: &str = "_output.zip";

#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("output name '{0}' is not a plain file name")]
    InvalidName(String),

    #[error("output file '{name}' is missing or unreadable: {source}")]
    MissingFile { name: String, source: io::Error },

    #[error("failed to write archive {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to build archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("packaging task failed: {0}")]
    Task(String),
}

/// Archive file name for a property, e.g. `villa-12_output.zip`.
pub fn archive_name_for(property_id: &str) -> String {
    let stem = sanitize_file_name(property_id, crate::job::DEFAULT_PROPERTY_ID);
    format!("{stem}{ARCHIVE_SUFFIX}")
}

/// Zip `files` (names relative to `output_dir`) into
/// `{output_dir}/{archive_name}` and return the archive path.
///
/// Runs on the blocking pool. On any failure the partial archive is removed.
pub async fn package_outputs(
    output_dir: &Path,
    files: &[String],
    archive_name: &str,
) -> Result<PathBuf, PackagingError> {
    for name in files.iter().map(String::as_str).chain([archive_name]) {
        if !is_plain_file_name(name) {
            return Err(PackagingError::InvalidName(name.to_string()));
        }
    }

    let output_dir = output_dir.to_path_buf();
    let files = files.to_vec();
    let archive_path = output_dir.join(archive_name);

    let task_path = archive_path.clone();
    let result = tokio::task::spawn_blocking(move || write_archive(&output_dir, &files, &task_path))
        .await
        .map_err(|e| PackagingError::Task(e.to_string()))
        .and_then(|r| r);

    match result {
        Ok(()) => {
            tracing::debug!(archive = %archive_path.display(), "Archive written");
            Ok(archive_path)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&archive_path).await;
            Err(e)
        }
    }
}

fn write_archive(output_dir: &Path, files: &[String], archive_path: &Path) -> Result<(), PackagingError> {
    let archive = File::create(archive_path).map_err(|source| PackagingError::Write {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut zip = ZipWriter::new(BufWriter::new(archive));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(ARCHIVE_COMPRESSION_LEVEL));

    for name in files {
        let mut source =
            File::open(output_dir.join(name)).map_err(|source| PackagingError::MissingFile {
                name: name.clone(),
                source,
            })?;
        zip.start_file(name.as_str(), options)?;
        io::copy(&mut source, &mut zip).map_err(|source| PackagingError::MissingFile {
            name: name.clone(),
            source,
        })?;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer).map_err(|source| PackagingError::Write {
        path: archive_path.to_path_buf(),
        source,
    })?;
    Ok(())
}
