use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lumina_core::generator::GeneratorRunner;
use lumina_core::storage::ArtifactStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumina_api::config::ServerConfig;
use lumina_api::engine::JobScheduler;
use lumina_api::router::build_app_router;
use lumina_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lumina_api=debug,lumina_core=debug,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Artifact store ---
    let store = Arc::new(ArtifactStore::new(&config.uploads_dir, &config.outputs_dir));
    store
        .ensure_roots()
        .await
        .expect("Failed to create upload and output directories");
    tracing::info!(
        uploads = %store.uploads_root().display(),
        outputs = %store.outputs_root().display(),
        "Artifact directories ready",
    );

    // --- Generator + scheduler ---
    let plan = config.generator.launch_plan();
    tracing::info!(
        strategies = plan.len(),
        script = %config.generator.script_path.display(),
        timeout_secs = ?config.generator.timeout_secs,
        "Generator launch plan configured",
    );
    let runner = Arc::new(GeneratorRunner::new(plan).with_timeout(config.generator.timeout()));
    let scheduler = Arc::new(
        JobScheduler::new(runner, Arc::clone(&store)).with_redispatch_delay(config.redispatch_delay()),
    );

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        scheduler: Arc::clone(&scheduler),
        store,
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let stop_accepting = CancellationToken::new();
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(stop_accepting.clone().cancelled_owned())
            .into_future(),
    );

    shutdown_signal().await;
    stop_accepting.cancel();

    // --- Post-shutdown cleanup ---
    tracing::info!("Stopping, no new connections accepted");

    // Kill the running generator so no orphan process outlives the server.
    scheduler.shutdown().await;

    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    match tokio::time::timeout(drain, server).await {
        Ok(Ok(Ok(()))) => tracing::info!("Graceful shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "Server task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "In-flight requests did not drain in time",
        ),
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
