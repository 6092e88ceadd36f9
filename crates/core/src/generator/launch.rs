//! Ranked launch strategies for the external generator.
//!
//! A deployment may ship the generator as a packaged executable, or rely on
//! an interpreter running the generator script. [`LaunchPlan`] tries each
//! [`LaunchStrategy`] in rank order at dispatch time and uses the first one
//! that can produce a command, so a packaged build runs without the
//! interpreter installed.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use super::GeneratorError;

/// Base name of the packaged generator executable.
pub const GENERATOR_EXECUTABLE_STEM: &str = "generator";

/// Packaged executable file name for the current platform
/// (`generator` or `generator.exe`).
pub fn executable_file_name() -> String {
    format!("{GENERATOR_EXECUTABLE_STEM}{}", std::env::consts::EXE_SUFFIX)
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Everything the generator needs for one job.
#[derive(Debug, Clone)]
pub struct GeneratorInvocation {
    /// Input images in submission order.
    pub images: Vec<PathBuf>,
    pub property_id: String,
    pub output_dir: PathBuf,
    /// Settings blob, serialized to JSON text on the command line.
    pub settings: serde_json::Value,
}

impl GeneratorInvocation {
    /// `--images <p>... --id <property> --output <dir> --settings <json>`
    pub fn args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.images.len() + 7);
        args.push(OsString::from("--images"));
        args.extend(self.images.iter().map(|p| p.clone().into_os_string()));
        args.push("--id".into());
        args.push(self.property_id.clone().into());
        args.push("--output".into());
        args.push(self.output_dir.clone().into_os_string());
        args.push("--settings".into());
        args.push(self.settings.to_string().into());
        args
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// One way of turning an invocation into a runnable command.
#[async_trait]
pub trait LaunchStrategy: Send + Sync + fmt::Debug {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Build the command, or `None` if this strategy is unavailable here.
    async fn prepare(&self, invocation: &GeneratorInvocation) -> Option<Command>;
}

/// A packaged generator executable at a fixed path.
///
/// Unavailable unless the file exists and, on Unix, carries an execute bit.
#[derive(Debug, Clone)]
pub struct BundledExecutable {
    label: String,
    path: PathBuf,
}

impl BundledExecutable {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }

    async fn is_runnable(&self) -> bool {
        let Ok(metadata) = tokio::fs::metadata(&self.path).await else {
            return false;
        };
        if !metadata.is_file() {
            return false;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                tracing::warn!(
                    path = %self.path.display(),
                    mode = %format!("{mode:#o}"),
                    "Bundled generator is not executable, skipping",
                );
                return false;
            }
        }

        true
    }
}

#[async_trait]
impl LaunchStrategy for BundledExecutable {
    fn name(&self) -> &str {
        &self.label
    }

    async fn prepare(&self, invocation: &GeneratorInvocation) -> Option<Command> {
        if !self.is_runnable().await {
            return None;
        }
        let mut cmd = Command::new(&self.path);
        cmd.args(invocation.args());
        Some(cmd)
    }
}

/// An interpreter running the generator script, e.g. `python3 generator.py`.
///
/// Always available; a missing interpreter surfaces as a spawn failure.
#[derive(Debug, Clone)]
pub struct Interpreter {
    program: OsString,
    script: PathBuf,
}

impl Interpreter {
    pub fn new(program: impl Into<OsString>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
        }
    }
}

#[async_trait]
impl LaunchStrategy for Interpreter {
    fn name(&self) -> &str {
        "interpreter"
    }

    async fn prepare(&self, invocation: &GeneratorInvocation) -> Option<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.script).args(invocation.args());
        Some(cmd)
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A command chosen by [`LaunchPlan::resolve`].
#[derive(Debug)]
pub struct ResolvedLaunch {
    pub strategy: String,
    pub command: Command,
}

/// Strategies in rank order; the first available one wins.
#[derive(Debug, Default)]
pub struct LaunchPlan {
    strategies: Vec<Box<dyn LaunchStrategy>>,
}

impl LaunchPlan {
    /// Append a strategy at the lowest rank.
    pub fn push(mut self, strategy: impl LaunchStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn resolve(
        &self,
        invocation: &GeneratorInvocation,
    ) -> Result<ResolvedLaunch, GeneratorError> {
        for strategy in &self.strategies {
            if let Some(command) = strategy.prepare(invocation).await {
                return Ok(ResolvedLaunch {
                    strategy: strategy.name().to_string(),
                    command,
                });
            }
            tracing::debug!(strategy = strategy.name(), "Launch strategy unavailable");
        }
        Err(GeneratorError::NoStrategy)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn invocation() -> GeneratorInvocation {
        GeneratorInvocation {
            images: vec![PathBuf::from("/in/1.jpg"), PathBuf::from("/in/2.jpg")],
            property_id: "villa-12".into(),
            output_dir: PathBuf::from("/out/job"),
            settings: serde_json::json!({"fps": 30}),
        }
    }

    #[test]
    fn args_follow_generator_cli() {
        let args: Vec<String> = invocation()
            .args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "--images",
                "/in/1.jpg",
                "/in/2.jpg",
                "--id",
                "villa-12",
                "--output",
                "/out/job",
                "--settings",
                r#"{"fps":30}"#,
            ]
        );
    }

    #[tokio::test]
    async fn missing_executable_falls_through_to_interpreter() {
        let plan = LaunchPlan::default()
            .push(BundledExecutable::new("development", "/nonexistent/generator"))
            .push(Interpreter::new("python3", "/opt/generator.py"));

        let resolved = plan.resolve(&invocation()).await.expect("resolve");
        assert_eq!(resolved.strategy, "interpreter");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_executable_file_is_skipped() {
        let f = tempfile::NamedTempFile::new().expect("create temp file");
        let plan = LaunchPlan::default().push(BundledExecutable::new("development", f.path()));

        let result = plan.resolve(&invocation()).await;
        assert_matches!(result, Err(GeneratorError::NoStrategy));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn executable_file_wins_over_interpreter() {
        use std::os::unix::fs::PermissionsExt;

        let f = tempfile::NamedTempFile::new().expect("create temp file");
        std::fs::set_permissions(f.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        let plan = LaunchPlan::default()
            .push(BundledExecutable::new("resources", f.path()))
            .push(Interpreter::new("python3", "/opt/generator.py"));

        let resolved = plan.resolve(&invocation()).await.expect("resolve");
        assert_eq!(resolved.strategy, "resources");
    }

    #[tokio::test]
    async fn empty_plan_has_no_strategy() {
        let result = LaunchPlan::default().resolve(&invocation()).await;
        assert_matches!(result, Err(GeneratorError::NoStrategy));
    }
}
