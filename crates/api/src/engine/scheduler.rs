//! Single-worker FIFO job scheduler.
//!
//! Jobs are run strictly one at a time in submission order. One async mutex
//! guards the registry, the pending queue and the running slot together, so
//! "pop the next id and mark it running" is a single atomic step and at most
//! one job is ever `running`.
//!
//! Each dispatched job gets its own run task that drives the generator,
//! applies its events to the record, packages the outputs, and then frees the
//! slot for the next job.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use lumina_core::error::CoreError;
use lumina_core::generator::{GeneratorEvent, GeneratorInvocation, GeneratorRunner, RunOutcome};
use lumina_core::job::{Job, JobStatus, JobSummary, NewJob};
use lumina_core::packaging::{archive_name_for, package_outputs};
use lumina_core::storage::ArtifactStore;
use lumina_core::types::JobId;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::progress;
use super::registry::JobRegistry;

/// Default pause between cancelling a running job and starting the next one.
pub const DEFAULT_REDISPATCH_DELAY: Duration = Duration::from_millis(100);

/// The job currently holding the worker.
#[derive(Debug)]
struct RunningSlot {
    job_id: JobId,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct SchedulerState {
    registry: JobRegistry,
    pending: VecDeque<JobId>,
    running: Option<RunningSlot>,
}

/// Owns every job and the single generator slot.
///
/// Built once at startup and shared through `AppState`.
pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    runner: Arc<GeneratorRunner>,
    store: Arc<ArtifactStore>,
    redispatch_delay: Duration,
}

impl JobScheduler {
    pub fn new(runner: Arc<GeneratorRunner>, store: Arc<ArtifactStore>) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            runner,
            store,
            redispatch_delay: DEFAULT_REDISPATCH_DELAY,
        }
    }

    pub fn with_redispatch_delay(mut self, delay: Duration) -> Self {
        self.redispatch_delay = delay;
        self
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn allocate_id(&self) -> JobId {
        self.state.lock().await.registry.allocate_id()
    }

    /// Snapshot of one job.
    pub async fn get(&self, job_id: JobId) -> Option<Job> {
        self.state.lock().await.registry.get(job_id).cloned()
    }

    /// Summaries of every job, newest first.
    pub async fn list(&self) -> Vec<JobSummary> {
        self.state.lock().await.registry.list()
    }

    /// Id of the job holding the worker, if any.
    pub async fn running_job(&self) -> Option<JobId> {
        self.state.lock().await.running.as_ref().map(|slot| slot.job_id)
    }

    /// Queued ids in dispatch order.
    pub async fn pending_jobs(&self) -> Vec<JobId> {
        self.state.lock().await.pending.iter().copied().collect()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Create a `queued` job and put it at the back of the queue.
    ///
    /// Returns the record as created; it may already be running by the time
    /// this returns.
    pub async fn submit(self: &Arc<Self>, job_id: JobId, input: NewJob) -> Result<Job, CoreError> {
        let job = self.state.lock().await.registry.create(job_id, input)?;
        tracing::info!(
            %job_id,
            property_id = %job.property_id,
            images = job.input_images.len(),
            "Job queued",
        );
        self.enqueue(job_id).await;
        Ok(job)
    }

    /// Append an existing job id to the queue and try to dispatch.
    pub async fn enqueue(self: &Arc<Self>, job_id: JobId) {
        self.state.lock().await.pending.push_back(job_id);
        self.dispatch().await;
    }

    /// Start the next queued job if the worker is free.
    ///
    /// Ids whose job is no longer `queued` are skipped.
    pub async fn dispatch(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return;
        }

        while let Some(job_id) = state.pending.pop_front() {
            let Some(job) = state.registry.get_mut(job_id) else {
                tracing::warn!(%job_id, "Queued id has no job record, skipping");
                continue;
            };
            if job.status != JobStatus::Queued {
                tracing::debug!(%job_id, status = %job.status, "Skipping job that is no longer queued");
                continue;
            }
            if let Err(e) = job.start() {
                tracing::error!(%job_id, error = %e, "Failed to start job");
                continue;
            }

            let invocation = GeneratorInvocation {
                images: job.input_images.clone(),
                property_id: job.property_id.clone(),
                output_dir: job.output_dir.clone(),
                settings: job.settings.clone(),
            };
            let cancel = CancellationToken::new();
            state.running = Some(RunningSlot {
                job_id,
                cancel: cancel.clone(),
            });
            let queued = state.pending.len();
            drop(state);

            tracing::info!(%job_id, queued, "Job dispatched");
            tokio::spawn(Arc::clone(self).run_job(job_id, invocation, cancel));
            return;
        }
    }

    /// Cancel a job and return the acknowledged status, which is always
    /// `canceled` for a known id.
    ///
    /// A running job has its generator killed and frees the worker; a queued
    /// job is removed from the queue; a finished job keeps its own status.
    pub async fn cancel(self: &Arc<Self>, job_id: JobId) -> Result<JobStatus, CoreError> {
        let mut state = self.state.lock().await;
        let job = state
            .registry
            .get_mut(job_id)
            .ok_or_else(|| CoreError::job_not_found(job_id))?;

        let status = job.status;
        match status {
            JobStatus::Running => {
                job.cancel()?;
                if let Some(slot) = state.running.take_if(|slot| slot.job_id == job_id) {
                    slot.cancel.cancel();
                }
                drop(state);

                tracing::info!(%job_id, "Running job canceled");
                self.schedule_dispatch(self.redispatch_delay);
                Ok(JobStatus::Canceled)
            }
            JobStatus::Queued => {
                job.cancel()?;
                state.pending.retain(|id| *id != job_id);
                tracing::info!(%job_id, "Queued job canceled");
                Ok(JobStatus::Canceled)
            }
            _ => {
                tracing::debug!(%job_id, %status, "Cancel ignored, job already finished");
                Ok(JobStatus::Canceled)
            }
        }
    }

    /// Kill the running generator, if any. Queued jobs are left queued.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let Some(slot) = state.running.take() else {
            return;
        };
        slot.cancel.cancel();
        if let Some(job) = state.registry.get_mut(slot.job_id) {
            if let Err(e) = job.cancel() {
                tracing::debug!(job_id = %slot.job_id, error = %e, "Job finished before shutdown");
            }
        }
        tracing::info!(job_id = %slot.job_id, "Running job canceled for shutdown");
    }

    // -----------------------------------------------------------------------
    // Run task
    // -----------------------------------------------------------------------

    /// Dispatch from a fresh task after `delay`.
    fn schedule_dispatch(self: &Arc<Self>, delay: Duration) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            scheduler.dispatch().await;
        });
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: JobId,
        invocation: GeneratorInvocation,
        cancel: CancellationToken,
    ) {
        let outcome = match self.store.create_output_dir(&invocation.output_dir).await {
            Ok(()) => self.drive_generator(job_id, &invocation, cancel).await,
            Err(e) => RunOutcome::LaunchFailed {
                message: e.to_string(),
            },
        };

        self.settle(job_id, &invocation, outcome).await;
        self.release(job_id).await;
    }

    /// Consume the generator's event stream until it reports an outcome.
    async fn drive_generator(
        &self,
        job_id: JobId,
        invocation: &GeneratorInvocation,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let mut events = self.runner.start(job_id, invocation.clone(), cancel);

        while let Some(event) = events.recv().await {
            match event {
                GeneratorEvent::Progress { format, percent } => {
                    let mut state = self.state.lock().await;
                    progress::apply_progress(&mut state.registry, job_id, format, percent);
                }
                GeneratorEvent::Finished(outcome) => return outcome,
            }
        }

        RunOutcome::Failed {
            message: "Generator stream closed without a result".to_string(),
        }
    }

    /// Record the outcome of a finished run on the job.
    async fn settle(&self, job_id: JobId, invocation: &GeneratorInvocation, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Succeeded { files } => {
                let declared = {
                    let mut state = self.state.lock().await;
                    progress::apply_declared_outputs(&mut state.registry, job_id, files.clone())
                };
                if !declared {
                    tracing::debug!(%job_id, "Job no longer running, skipping packaging");
                    return;
                }

                let archive_name = archive_name_for(&invocation.property_id);
                let packaged = package_outputs(&invocation.output_dir, &files, &archive_name).await;

                let mut state = self.state.lock().await;
                match packaged {
                    Ok(archive) => {
                        progress::apply_completion(&mut state.registry, job_id, files, archive);
                    }
                    Err(e) => {
                        progress::apply_failure(
                            &mut state.registry,
                            job_id,
                            format!("Failed to package outputs: {e}"),
                        );
                    }
                }
            }
            RunOutcome::Failed { message } => {
                let mut state = self.state.lock().await;
                progress::apply_failure(&mut state.registry, job_id, message);
            }
            RunOutcome::LaunchFailed { message } => {
                let mut state = self.state.lock().await;
                progress::apply_failure(
                    &mut state.registry,
                    job_id,
                    format!("Failed to launch generator: {message}"),
                );
            }
            RunOutcome::Canceled => {
                tracing::debug!(%job_id, "Generator run ended by cancellation");
            }
        }
    }

    /// Free the worker if this job still holds it, then start the next job.
    ///
    /// A canceled job has already given up the slot and scheduled its own
    /// delayed dispatch.
    async fn release(self: &Arc<Self>, job_id: JobId) {
        let released = {
            let mut state = self.state.lock().await;
            state.running.take_if(|slot| slot.job_id == job_id).is_some()
        };
        if released {
            self.schedule_dispatch(Duration::ZERO);
        }
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("redispatch_delay", &self.redispatch_delay)
            .finish_non_exhaustive()
    }
}
