//! Domain logic for the Lumina Vids rendering backend.
//!
//! Nothing here knows about HTTP: the job model and its state machine, the
//! on-disk artifact layout, zip packaging, and supervision of the external
//! generator process.

pub mod error;
pub mod formats;
pub mod generator;
pub mod job;
pub mod packaging;
pub mod storage;
pub mod types;
