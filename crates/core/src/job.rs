//! Job records and the status state machine.
//!
//! ```text
//! queued ──> running ──> done
//!   │           ├──────> error
//!   │           └──────> canceled
//!   └──────────────────> canceled
//! ```
//!
//! `done`, `error` and `canceled` are terminal. Every mutation goes through
//! [`Job::transition`], so a late exit handler can never overwrite a
//! cancellation.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::formats::TargetFormat;
use crate::types::{JobId, Timestamp};

/// Property label used when the caller does not supply one.
pub const DEFAULT_PROPERTY_ID: &str = "prop";

/// Per-format completion percentage.
pub type Progress = IndexMap<TargetFormat, u8>;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Canceled) | (Running, Done | Error | Canceled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Caller-supplied fields for a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Uploaded image paths, in the order they were submitted.
    pub input_images: Vec<PathBuf>,
    /// Rendering parameters forwarded verbatim to the generator.
    pub settings: serde_json::Value,
    /// Label for output file names. Blank or missing falls back to
    /// [`DEFAULT_PROPERTY_ID`].
    pub property_id: Option<String>,
    /// Directory owned exclusively by this job for generated artifacts.
    pub output_dir: PathBuf,
}

/// One generation request and everything known about its execution.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub input_images: Vec<PathBuf>,
    pub settings: serde_json::Value,
    pub property_id: String,
    pub created_at: Timestamp,
    pub output_dir: PathBuf,
    /// Produced file names; set only once the job is `done`.
    pub files: Option<Vec<String>>,
    /// Outputs the generator reported. Kept even if packaging later fails,
    /// so each file stays downloadable on its own.
    pub declared_files: Vec<String>,
    /// Packaged archive; set only once the job is `done`.
    pub archive_file: Option<PathBuf>,
    /// Failure description; set only once the job is `error`.
    pub error_message: Option<String>,
    /// Empty until the job starts running.
    pub progress: Progress,
}

impl Job {
    pub fn new(id: JobId, input: NewJob) -> Self {
        let property_id = input
            .property_id
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROPERTY_ID.to_string());

        Self {
            id,
            status: JobStatus::Queued,
            input_images: input.input_images,
            settings: input.settings,
            property_id,
            created_at: chrono::Utc::now(),
            output_dir: input.output_dir,
            files: None,
            declared_files: Vec::new(),
            archive_file: None,
            error_message: None,
            progress: Progress::new(),
        }
    }

    /// Move to `next`, rejecting anything the state machine forbids.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// `queued -> running`, zeroing progress for every target format.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Running)?;
        self.progress = TargetFormat::ALL.into_iter().map(|f| (f, 0)).collect();
        Ok(())
    }

    /// Remember the outputs a successful run reported, before packaging.
    /// Only a running job accepts them.
    pub fn declare_outputs(&mut self, files: Vec<String>) -> Result<(), CoreError> {
        if self.status != JobStatus::Running {
            return Err(CoreError::Conflict(format!(
                "job {} is {}, outputs can only be declared while running",
                self.id, self.status
            )));
        }
        self.declared_files = files;
        Ok(())
    }

    /// `running -> done` with the produced files and their archive.
    pub fn complete(&mut self, files: Vec<String>, archive_file: PathBuf) -> Result<(), CoreError> {
        self.transition(JobStatus::Done)?;
        self.files = Some(files);
        self.archive_file = Some(archive_file);
        Ok(())
    }

    /// `running -> error`. Fails with `Conflict` if the job was canceled first.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Canceled)
    }

    /// Record a progress marker. Returns `false` when the update was dropped
    /// because the job is not running or the format is not tracked.
    pub fn record_progress(&mut self, format: TargetFormat, percent: u8) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        match self.progress.get_mut(&format) {
            Some(slot) => {
                *slot = percent;
                true
            }
            None => false,
        }
    }

    /// Base name of the packaged archive, if one exists.
    pub fn archive_name(&self) -> Option<String> {
        self.archive_file
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Whether `file_name` is one of this job's declared outputs or its archive.
    pub fn is_downloadable(&self, file_name: &str) -> bool {
        let declared = self
            .files
            .iter()
            .flatten()
            .chain(&self.declared_files)
            .any(|f| f == file_name);
        declared || self.archive_name().as_deref() == Some(file_name)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id,
            property_id: self.property_id.clone(),
            status: self.status,
            created_at: self.created_at,
            files_count: self.files.as_ref().map_or(0, Vec::len),
            has_archive: self.archive_file.is_some(),
        }
    }
}

/// Compact view of a job for history listings.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub property_id: String,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub files_count: usize,
    pub has_archive: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn new_job() -> Job {
        Job::new(
            uuid::Uuid::new_v4(),
            NewJob {
                input_images: vec![PathBuf::from("/tmp/a.jpg"), PathBuf::from("/tmp/b.jpg")],
                settings: serde_json::json!({"fps": 30}),
                property_id: Some("villa-12".into()),
                output_dir: PathBuf::from("/tmp/out"),
            },
        )
    }

    #[test]
    fn new_job_is_queued_without_progress() {
        let job = new_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.progress.is_empty());
        assert!(job.files.is_none());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn blank_property_id_falls_back_to_default() {
        let job = Job::new(
            uuid::Uuid::new_v4(),
            NewJob {
                input_images: vec![],
                settings: serde_json::json!({}),
                property_id: Some("   ".into()),
                output_dir: PathBuf::from("/tmp/out"),
            },
        );
        assert_eq!(job.property_id, DEFAULT_PROPERTY_ID);
    }

    #[test]
    fn start_zeroes_progress_for_every_format() {
        let mut job = new_job();
        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        let keys: Vec<_> = job.progress.keys().copied().collect();
        assert_eq!(keys, TargetFormat::ALL.to_vec());
        assert!(job.progress.values().all(|p| *p == 0));
    }

    #[test]
    fn terminal_statuses_reject_every_transition() {
        use JobStatus::*;
        for from in [Done, Error, Canceled] {
            for to in [Queued, Running, Done, Error, Canceled] {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn queued_cannot_complete_directly() {
        let mut job = new_job();
        let result = job.complete(vec!["a.mp4".into()], PathBuf::from("/tmp/out/a.zip"));
        assert_matches!(result, Err(CoreError::Conflict(_)));
        assert!(job.files.is_none());
    }

    #[test]
    fn canceled_job_is_never_overwritten_by_failure() {
        let mut job = new_job();
        job.start().unwrap();
        job.cancel().unwrap();

        assert_matches!(job.fail("exit code 143"), Err(CoreError::Conflict(_)));
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn progress_only_recorded_while_running() {
        let mut job = new_job();
        assert!(!job.record_progress(TargetFormat::Square, 10));

        job.start().unwrap();
        assert!(job.record_progress(TargetFormat::Square, 40));
        assert_eq!(job.progress[&TargetFormat::Square], 40);
        assert_eq!(job.progress[&TargetFormat::Vertical], 0);

        job.cancel().unwrap();
        assert!(!job.record_progress(TargetFormat::Square, 90));
        assert_eq!(job.progress[&TargetFormat::Square], 40);
    }

    #[test]
    fn only_declared_outputs_and_archive_are_downloadable() {
        let mut job = new_job();
        job.start().unwrap();
        job.complete(
            vec!["a.mp4".into(), "b.mp4".into()],
            PathBuf::from("/tmp/out/villa-12_output.zip"),
        )
        .unwrap();

        assert!(job.is_downloadable("a.mp4"));
        assert!(job.is_downloadable("b.mp4"));
        assert!(job.is_downloadable("villa-12_output.zip"));
        assert!(!job.is_downloadable("c.mp4"));
        assert!(!job.is_downloadable("../a.mp4"));
    }

    #[test]
    fn declared_outputs_stay_downloadable_after_failure() {
        let mut job = new_job();
        job.start().unwrap();
        job.declare_outputs(vec!["a.mp4".into(), "ghost.mp4".into()])
            .unwrap();
        job.fail("Failed to package outputs").unwrap();

        assert!(job.files.is_none());
        assert!(job.is_downloadable("a.mp4"));
        assert!(!job.is_downloadable("b.mp4"));
    }

    #[test]
    fn outputs_cannot_be_declared_unless_running() {
        let mut job = new_job();
        assert_matches!(
            job.declare_outputs(vec!["a.mp4".into()]),
            Err(CoreError::Conflict(_))
        );
        assert!(job.declared_files.is_empty());
    }

    #[test]
    fn summary_counts_files() {
        let mut job = new_job();
        job.start().unwrap();
        job.complete(vec!["a.mp4".into()], PathBuf::from("/tmp/out/x.zip"))
            .unwrap();

        let summary = job.summary();
        assert_eq!(summary.files_count, 1);
        assert!(summary.has_archive);
        assert_eq!(summary.status, JobStatus::Done);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Canceled).unwrap();
        assert_eq!(json, "\"canceled\"");
    }
}
