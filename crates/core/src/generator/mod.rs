//! Supervision of the external slideshow generator.
//!
//! [`launch`] decides how to start the generator, [`runner`] owns the child
//! process and its two output streams, and [`protocol`] turns raw lines into
//! [`GeneratorEvent`]s. Callers only consume the event stream returned by
//! [`GeneratorRunner::start`].

pub mod launch;
pub mod protocol;
pub mod runner;

pub use launch::{BundledExecutable, GeneratorInvocation, Interpreter, LaunchPlan, LaunchStrategy};
pub use protocol::{GeneratorEvent, RunOutcome};
pub use runner::GeneratorRunner;

/// Reasons the generator process could not be started.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("no launch strategy is available (no bundled executable or interpreter configured)")]
    NoStrategy,

    #[error("failed to spawn generator via {strategy}: {source}")]
    Spawn {
        strategy: String,
        source: std::io::Error,
    },
}
