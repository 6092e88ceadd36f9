use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lumina_core::generator::launch::executable_file_name;
use lumina_core::generator::{BundledExecutable, Interpreter, LaunchPlan};

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3001`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `300`). Uploads of twenty
    /// photos plus music need more than the usual API budget.
    pub request_timeout_secs: u64,
    /// How long to wait for in-flight requests on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Root for uploaded inputs (default: `./uploads`).
    pub uploads_dir: PathBuf,
    /// Root for generated outputs (default: `./outputs`).
    pub outputs_dir: PathBuf,
    /// Maximum multipart request body in bytes (default: 512 MiB).
    pub max_upload_bytes: usize,
    /// Pause before dispatching the next job after a cancel (default: `100`).
    pub redispatch_delay_ms: u64,
    /// How to find and run the generator.
    pub generator: GeneratorConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3001`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `300`                      |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                       |
    /// | `UPLOADS_DIR`           | `./uploads`                |
    /// | `OUTPUTS_DIR`           | `./outputs`                |
    /// | `MAX_UPLOAD_BYTES`      | `536870912`                |
    /// | `REDISPATCH_DELAY_MS`   | `100`                      |
    ///
    /// Panics on unparseable values so misconfiguration fails at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_env("PORT", "3001");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_env("REQUEST_TIMEOUT_SECS", "300");
        let shutdown_timeout_secs: u64 = parse_env("SHUTDOWN_TIMEOUT_SECS", "30");

        let uploads_dir = PathBuf::from(std::env::var("UPLOADS_DIR").unwrap_or_else(|_| "./uploads".into()));
        let outputs_dir = PathBuf::from(std::env::var("OUTPUTS_DIR").unwrap_or_else(|_| "./outputs".into()));

        let max_upload_bytes: usize = parse_env("MAX_UPLOAD_BYTES", "536870912");
        let redispatch_delay_ms: u64 = parse_env("REDISPATCH_DELAY_MS", "100");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            uploads_dir,
            outputs_dir,
            max_upload_bytes,
            redispatch_delay_ms,
            generator: GeneratorConfig::from_env(),
        }
    }

    pub fn redispatch_delay(&self) -> Duration {
        Duration::from_millis(self.redispatch_delay_ms)
    }
}

/// Where the generator lives and how long it may run.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Packaged executable used during development.
    pub bundled_path: PathBuf,
    /// Resources directory of a packaged install; its `bin/` may hold the
    /// executable.
    pub resources_path: Option<PathBuf>,
    /// Interpreter for the script fallback.
    pub python_bin: String,
    /// Generator script run by the interpreter.
    pub script_path: PathBuf,
    /// Kill runs that take longer than this. `None` means no limit.
    pub timeout_secs: Option<u64>,
}

impl GeneratorConfig {
    /// Load generator settings from environment variables.
    ///
    /// | Env Var                  | Default                                  |
    /// |--------------------------|------------------------------------------|
    /// | `GENERATOR_BIN`          | `<cwd>/api/bin/generator[.exe]`          |
    /// | `RESOURCES_PATH`         | unset                                    |
    /// | `PYTHON_BIN`             | `python3`                                |
    /// | `GENERATOR_SCRIPT`       | `<cwd>/api/generator/generator.py`       |
    /// | `GENERATOR_TIMEOUT_SECS` | unset (no limit)                         |
    pub fn from_env() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let bundled_path = std::env::var("GENERATOR_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| cwd.join("api").join("bin").join(executable_file_name()));

        let resources_path = std::env::var("RESOURCES_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let python_bin = std::env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".into());

        let script_path = std::env::var("GENERATOR_SCRIPT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| cwd.join("api").join("generator").join("generator.py"));

        let timeout_secs = std::env::var("GENERATOR_TIMEOUT_SECS").ok().map(|v| {
            v.parse::<u64>()
                .expect("GENERATOR_TIMEOUT_SECS must be a valid u64")
        });

        Self {
            bundled_path,
            resources_path,
            python_bin,
            script_path,
            timeout_secs,
        }
    }

    /// Launch strategies in rank order: development executable, packaged
    /// resources executable, then the interpreter.
    pub fn launch_plan(&self) -> LaunchPlan {
        let mut plan = LaunchPlan::default().push(BundledExecutable::new("development", &self.bundled_path));
        if let Some(resources) = &self.resources_path {
            plan = plan.push(BundledExecutable::new(
                "resources",
                resources.join("bin").join(executable_file_name()),
            ));
        }
        plan.push(Interpreter::new(&self.python_bin, &self.script_path))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn parse_env<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.into());
    raw.parse()
        .unwrap_or_else(|e| panic!("{key} must be a valid {}: {e}", std::any::type_name::<T>()))
}
