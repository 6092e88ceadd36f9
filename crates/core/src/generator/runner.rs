//! Runs one generator process and streams what it reports.
//!
//! The child's stdout is retained (tail-capped) for the final result record
//! and its stderr is relayed line by line as progress events. The run ends
//! when the process exits, the job's cancellation token fires, or the
//! optional wall-clock timeout elapses.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::launch::{GeneratorInvocation, LaunchPlan, ResolvedLaunch};
use super::protocol::{
    classify_stderr_line, exit_failure_message, outcome_from_stdout, GeneratorEvent, RunOutcome,
    StderrLine,
};
use super::GeneratorError;
use crate::formats::TargetFormat;
use crate::types::JobId;

/// Maximum stdout retained per run (10 MiB). Older lines are dropped first
/// so the trailing result record always survives.
pub const MAX_STDOUT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum diagnostic text kept for error messages (16 KiB, tail).
pub const MAX_DIAGNOSTIC_BYTES: usize = 16 * 1024;

/// Buffered events between the stderr relay and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Exit code reported when the process was terminated by a signal.
const SIGNAL_EXIT_CODE: i32 = -1;

/// Supervises generator processes, one call to [`start`](Self::start) per job.
#[derive(Debug)]
pub struct GeneratorRunner {
    plan: LaunchPlan,
    timeout: Option<Duration>,
}

enum Exit {
    Exited(std::io::Result<ExitStatus>),
    Canceled,
    TimedOut(Duration),
}

impl GeneratorRunner {
    pub fn new(plan: LaunchPlan) -> Self {
        Self {
            plan,
            timeout: None,
        }
    }

    /// Kill runs that exceed `timeout`. `None` lets runs take as long as
    /// they need.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Launch the generator for one job and return its event stream.
    ///
    /// Progress events arrive while the process runs; the final event is
    /// always [`GeneratorEvent::Finished`]. Cancelling `cancel` kills the
    /// child and finishes the stream with [`RunOutcome::Canceled`].
    pub fn start(
        self: &Arc<Self>,
        job_id: JobId,
        invocation: GeneratorInvocation,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<GeneratorEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let runner = Arc::clone(self);

        tokio::spawn(async move {
            let outcome = runner.supervise(job_id, &invocation, &tx, cancel).await;
            let _ = tx.send(GeneratorEvent::Finished(outcome)).await;
        });

        rx
    }

    async fn supervise(
        &self,
        job_id: JobId,
        invocation: &GeneratorInvocation,
        events: &mpsc::Sender<GeneratorEvent>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let ResolvedLaunch {
            strategy,
            mut command,
        } = match self.plan.resolve(invocation).await {
            Ok(launch) => launch,
            Err(e) => {
                tracing::error!(%job_id, error = %e, "No way to launch generator");
                return RunOutcome::LaunchFailed {
                    message: e.to_string(),
                };
            }
        };

        // `kill_on_drop(true)` guarantees no orphan if this task is aborted.
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = GeneratorError::Spawn { strategy, source };
                tracing::error!(%job_id, error = %err, "Generator failed to start");
                return RunOutcome::LaunchFailed {
                    message: err.to_string(),
                };
            }
        };

        tracing::info!(
            %job_id,
            strategy = %strategy,
            pid = child.id(),
            images = invocation.images.len(),
            output_dir = %invocation.output_dir.display(),
            "Generator started",
        );

        let stdout_task = tokio::spawn(collect_stdout(job_id, child.stdout.take()));
        let stderr_task = tokio::spawn(relay_stderr(job_id, child.stderr.take(), events.clone()));

        let started = Instant::now();
        let timeout = self.timeout;
        let exit = tokio::select! {
            status = child.wait() => Exit::Exited(status),
            () = cancel.cancelled() => Exit::Canceled,
            () = sleep_for(timeout) => Exit::TimedOut(timeout.unwrap_or_default()),
        };

        match exit {
            Exit::Exited(Ok(status)) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let diagnostics = stderr_task.await.unwrap_or_default();
                let exit_code = status.code().unwrap_or(SIGNAL_EXIT_CODE);

                tracing::info!(
                    %job_id,
                    exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Generator exited",
                );

                if exit_code == 0 {
                    outcome_from_stdout(&stdout)
                } else {
                    RunOutcome::Failed {
                        message: exit_failure_message(exit_code, &diagnostics),
                    }
                }
            }
            Exit::Exited(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                tracing::error!(%job_id, error = %e, "Lost track of generator process");
                RunOutcome::Failed {
                    message: format!("Failed to wait for generator: {e}"),
                }
            }
            Exit::Canceled => {
                terminate(job_id, &mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                tracing::info!(%job_id, "Generator killed after cancellation");
                RunOutcome::Canceled
            }
            Exit::TimedOut(limit) => {
                terminate(job_id, &mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                tracing::warn!(%job_id, timeout_secs = limit.as_secs(), "Generator timed out");
                RunOutcome::Failed {
                    message: format!("Generator timed out after {}s", limit.as_secs()),
                }
            }
        }
    }
}

/// Sleep for `timeout`, or forever when there is none.
async fn sleep_for(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn terminate(job_id: JobId, child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(%job_id, error = %e, "Failed to signal generator");
        return;
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(%job_id, error = %e, "Failed to reap generator");
    }
}

// ---------------------------------------------------------------------------
// Stream readers
// ---------------------------------------------------------------------------

/// Read stdout to EOF, logging each line and keeping the tail.
async fn collect_stdout<R: AsyncRead + Unpin>(job_id: JobId, handle: Option<R>) -> String {
    let mut retained = TailBuffer::new(MAX_STDOUT_BYTES);
    let Some(handle) = handle else {
        return String::new();
    };

    let mut lines = LineReader::new(handle);
    while let Some(line) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::debug!(%job_id, line = line.trim(), "Generator stdout");
        }
        retained.push(line);
    }
    retained.into_string()
}

/// Read stderr to EOF, forwarding progress markers and collecting
/// diagnostic text.
async fn relay_stderr<R: AsyncRead + Unpin>(
    job_id: JobId,
    handle: Option<R>,
    events: mpsc::Sender<GeneratorEvent>,
) -> String {
    let mut diagnostics = TailBuffer::new(MAX_DIAGNOSTIC_BYTES);
    let Some(handle) = handle else {
        return String::new();
    };

    let mut lines = LineReader::new(handle);
    while let Some(line) = lines.next_line().await {
        match classify_stderr_line(&line) {
            StderrLine::Progress { format, percent } => match format.parse::<TargetFormat>() {
                Ok(format) => {
                    let _ = events.send(GeneratorEvent::Progress { format, percent }).await;
                }
                Err(e) => tracing::debug!(%job_id, error = %e, "Ignoring progress marker"),
            },
            StderrLine::Diagnostic(text) => {
                tracing::warn!(%job_id, line = text, "Generator stderr");
                diagnostics.push(text.to_string());
            }
            StderrLine::Blank => {}
        }
    }
    diagnostics.into_string()
}

/// Newline-delimited reader tolerant of invalid UTF-8.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at EOF or on read error.
    async fn next_line(&mut self) -> Option<String> {
        self.buf.clear();
        match self.inner.read_until(b'\n', &mut self.buf).await {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf);
                Some(line.trim_end_matches(['\n', '\r']).to_string())
            }
        }
    }
}

/// Line buffer that keeps only the most recent `cap` bytes.
struct TailBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    cap: usize,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            cap,
        }
    }

    fn push(&mut self, line: String) {
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        while self.bytes > self.cap && self.lines.len() > 1 {
            if let Some(dropped) = self.lines.pop_front() {
                self.bytes -= dropped.len() + 1;
            }
        }
    }

    fn into_string(self) -> String {
        let mut out = String::with_capacity(self.bytes);
        for line in self.lines {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
