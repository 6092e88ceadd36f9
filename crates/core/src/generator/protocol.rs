//! Text protocol spoken by the external generator.
//!
//! - **stderr** carries progress markers of the form
//!   `::PROGRESS::<format>::<percent>` interleaved with free diagnostic text.
//!   Every line is classified on its own.
//! - **stdout** is free text whose last JSON object with a `status` field is
//!   the result record, e.g. `{"status": "success", "files": ["a.mp4"]}`.
//!
//! All format knowledge lives here so the runner and scheduler only ever
//! see [`GeneratorEvent`]s.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::formats::TargetFormat;

/// Regex pattern matching a progress marker anywhere on a stderr line.
pub const PROGRESS_PATTERN: &str = r"::PROGRESS::(.*?)::(\d+)";

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PROGRESS_PATTERN).expect("valid regex"));

/// `status` value marking a successful run.
pub const STATUS_SUCCESS: &str = "success";

/// `status` given to a record whose fields have the wrong shape. Never a
/// success.
const STATUS_MALFORMED: &str = "malformed";

/// Message used when a zero exit produced no result record.
pub const NO_RESULT_MESSAGE: &str = "Unknown generator error (no JSON result)";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What the runner reports while supervising one generator process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorEvent {
    /// A progress marker for a known target format.
    Progress { format: TargetFormat, percent: u8 },
    /// The run is over; always the last event on the stream.
    Finished(RunOutcome),
}

/// Final classification of a generator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Zero exit with a success record listing the produced files.
    Succeeded { files: Vec<String> },
    /// Non-zero exit, timeout, or zero exit without a success record.
    Failed { message: String },
    /// The process was killed because the job was canceled.
    Canceled,
    /// No process could be started.
    LaunchFailed { message: String },
}

// ---------------------------------------------------------------------------
// stderr
// ---------------------------------------------------------------------------

/// Classification of one stderr line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StderrLine<'a> {
    /// A progress marker. `format` is the raw key and may name an unknown
    /// format; percent is clamped to 100.
    Progress { format: &'a str, percent: u8 },
    /// Anything else that is not blank.
    Diagnostic(&'a str),
    Blank,
}

pub fn classify_stderr_line(line: &str) -> StderrLine<'_> {
    if let Some(caps) = PROGRESS_RE.captures(line) {
        let format = caps.get(1).map_or("", |m| m.as_str());
        // An overflowing number is not a valid marker; fall through to text.
        if let Some(percent) = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok()) {
            return StderrLine::Progress {
                format,
                percent: percent.min(100) as u8,
            };
        }
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        StderrLine::Blank
    } else {
        StderrLine::Diagnostic(trimmed)
    }
}

// ---------------------------------------------------------------------------
// stdout
// ---------------------------------------------------------------------------

/// The structured record the generator prints last on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResultRecord {
    pub status: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResultRecord {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Read a record, degrading one with badly typed fields to a failure
    /// that keeps a string `message` if there is one.
    fn from_value(value: serde_json::Value) -> Self {
        let message = value
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Generator result record is malformed");
            Self {
                status: STATUS_MALFORMED.to_string(),
                files: Vec::new(),
                message,
            }
        })
    }
}

/// Scan `stdout` from the last line backwards and return the first JSON
/// object carrying a `status` field.
///
/// That object is authoritative even if its fields have the wrong types;
/// the scan never falls back to an earlier record. Lines that are not JSON
/// objects are skipped.
pub fn find_result_record(stdout: &str) -> Option<ResultRecord> {
    stdout
        .lines()
        .rev()
        .find_map(|line| {
            let line = line.trim();
            if !line.starts_with('{') {
                return None;
            }
            let value: serde_json::Value = serde_json::from_str(line).ok()?;
            value.get("status")?;
            Some(value)
        })
        .map(ResultRecord::from_value)
}

/// Classify a run that exited with code 0.
pub fn outcome_from_stdout(stdout: &str) -> RunOutcome {
    match find_result_record(stdout) {
        Some(record) if record.is_success() => RunOutcome::Succeeded {
            files: record.files,
        },
        Some(record) => RunOutcome::Failed {
            message: record
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| NO_RESULT_MESSAGE.to_string()),
        },
        None => RunOutcome::Failed {
            message: NO_RESULT_MESSAGE.to_string(),
        },
    }
}

/// Message for a run that exited with a non-zero code.
pub fn exit_failure_message(exit_code: i32, diagnostics: &str) -> String {
    format!("Generator exited with code {exit_code}. Stderr: {diagnostics}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
