use std::sync::Arc;

use lumina_core::storage::ArtifactStore;

use crate::config::ServerConfig;
use crate::engine::JobScheduler;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The single job scheduler for this process.
    pub scheduler: Arc<JobScheduler>,
    /// Upload and output directories.
    pub store: Arc<ArtifactStore>,
}
