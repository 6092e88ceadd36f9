//! Applies what the generator reports to the job record.
//!
//! Every function here runs with the scheduler lock held. Updates that the
//! job's state machine refuses (typically because the job was canceled
//! while the generator was still running) are logged and dropped.

use std::path::PathBuf;

use lumina_core::error::CoreError;
use lumina_core::formats::TargetFormat;
use lumina_core::types::JobId;

use super::registry::JobRegistry;

/// Record one progress marker.
pub fn apply_progress(registry: &mut JobRegistry, job_id: JobId, format: TargetFormat, percent: u8) {
    let recorded = registry
        .get_mut(job_id)
        .is_some_and(|job| job.record_progress(format, percent));

    if recorded {
        tracing::trace!(%job_id, %format, percent, "Progress updated");
    } else {
        tracing::debug!(%job_id, %format, percent, "Progress dropped, job not running");
    }
}

/// Record the outputs a successful run reported. Returns `false` when the
/// job is no longer running, in which case nothing should be packaged.
pub fn apply_declared_outputs(registry: &mut JobRegistry, job_id: JobId, files: Vec<String>) -> bool {
    match registry.mutate(job_id, |job| job.declare_outputs(files)) {
        Ok(()) => true,
        Err(e) => {
            log_refused(job_id, "outputs", &e);
            false
        }
    }
}

/// Mark a job `done` with its outputs and archive.
pub fn apply_completion(
    registry: &mut JobRegistry,
    job_id: JobId,
    files: Vec<String>,
    archive: PathBuf,
) {
    let files_count = files.len();
    match registry.mutate(job_id, |job| job.complete(files, archive)) {
        Ok(()) => tracing::info!(%job_id, files_count, "Job completed"),
        Err(e) => log_refused(job_id, "completion", &e),
    }
}

/// Mark a job `error`. A job canceled in the meantime stays canceled.
pub fn apply_failure(registry: &mut JobRegistry, job_id: JobId, message: String) {
    match registry.mutate(job_id, |job| job.fail(message.clone())) {
        Ok(()) => tracing::warn!(%job_id, error = %message, "Job failed"),
        Err(e) => log_refused(job_id, "failure", &e),
    }
}

fn log_refused(job_id: JobId, update: &str, err: &CoreError) {
    match err {
        CoreError::Conflict(_) => {
            tracing::debug!(%job_id, update, reason = %err, "Late update ignored");
        }
        _ => tracing::error!(%job_id, update, error = %err, "Failed to update job"),
    }
}

#[cfg(test)]
mod tests {
    use lumina_core::job::{JobStatus, NewJob};

    use super::*;

    fn running_job(registry: &mut JobRegistry) -> JobId {
        let id = registry.allocate_id();
        registry
            .create(
                id,
                NewJob {
                    input_images: vec![],
                    settings: serde_json::json!({}),
                    property_id: None,
                    output_dir: PathBuf::from("/tmp/out"),
                },
            )
            .unwrap();
        registry.mutate(id, |job| job.start()).unwrap();
        id
    }

    #[test]
    fn progress_updates_only_the_named_format() {
        let mut registry = JobRegistry::new();
        let id = running_job(&mut registry);

        apply_progress(&mut registry, id, TargetFormat::Landscape, 64);

        let progress = &registry.get(id).unwrap().progress;
        assert_eq!(progress[&TargetFormat::Landscape], 64);
        assert_eq!(progress[&TargetFormat::Vertical], 0);
        assert_eq!(progress[&TargetFormat::Square], 0);
        assert_eq!(progress[&TargetFormat::Portrait], 0);
    }

    #[test]
    fn failure_after_cancel_keeps_canceled() {
        let mut registry = JobRegistry::new();
        let id = running_job(&mut registry);
        registry.mutate(id, |job| job.cancel()).unwrap();

        apply_failure(&mut registry, id, "Generator exited with code -1".into());

        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn completion_records_files_and_archive() {
        let mut registry = JobRegistry::new();
        let id = running_job(&mut registry);

        apply_completion(
            &mut registry,
            id,
            vec!["a.mp4".into()],
            PathBuf::from("/tmp/out/prop_output.zip"),
        );

        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.files.as_deref(), Some(&["a.mp4".to_string()][..]));
        assert_eq!(job.archive_name().as_deref(), Some("prop_output.zip"));
    }

    #[test]
    fn declared_outputs_refused_after_cancel() {
        let mut registry = JobRegistry::new();
        let id = running_job(&mut registry);
        registry.mutate(id, |job| job.cancel()).unwrap();

        assert!(!apply_declared_outputs(&mut registry, id, vec!["a.mp4".into()]));
        assert!(registry.get(id).unwrap().declared_files.is_empty());
    }

    #[test]
    fn unknown_job_is_ignored() {
        let mut registry = JobRegistry::new();
        apply_progress(&mut registry, uuid::Uuid::new_v4(), TargetFormat::Square, 10);
        apply_failure(&mut registry, uuid::Uuid::new_v4(), "boom".into());
        assert!(registry.is_empty());
    }
}
