//! Job execution engine.
//!
//! Holds every job record in memory and runs them one at a time through the
//! external generator, translating its events into job updates.

pub mod progress;
pub mod registry;
pub mod scheduler;

pub use registry::JobRegistry;
pub use scheduler::JobScheduler;
