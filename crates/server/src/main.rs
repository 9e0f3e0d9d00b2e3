// crates/server/src/main.rs
//! Mediaferry server binary.
//!
//! Opens the job database, fails jobs a previous process left running, then
//! serves the downloads API until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mediaferry_core::JobStore;
use mediaferry_db::Database;
use mediaferry_observability::init_tracing;
use mediaferry_server::jobs::{JobCoordinator, ProgressBus};
use mediaferry_server::scheduler::spawn_periodic_submissions;
use mediaferry_server::{create_app, init_metrics, AppState, Config};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    let _log_guard = init_tracing(&config.log_config())?;
    init_metrics();

    let db = Database::new(&config.db_path)
        .await
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;
    let recovered = db.recover_interrupted_jobs().await?;
    if recovered > 0 {
        tracing::warn!(count = recovered, "Marked interrupted jobs as failed");
    }

    std::fs::create_dir_all(&config.downloads_dir).with_context(|| {
        format!("creating downloads dir {}", config.downloads_dir.display())
    })?;

    let store: Arc<dyn JobStore> = Arc::new(db);
    let coordinator = Arc::new(JobCoordinator::new(
        store,
        ProgressBus::new(),
        config.coordinator_options(),
    ));

    let shutdown = CancellationToken::new();
    if let Some(schedule) = config.schedule() {
        spawn_periodic_submissions(Arc::clone(&coordinator), schedule, shutdown.clone());
    }

    let app = create_app(AppState::new(coordinator));
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        %addr,
        downloader = %config.downloader,
        downloads_dir = %config.downloads_dir.display(),
        "mediaferry listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
