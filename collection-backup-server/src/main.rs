mod config;
mod error;
mod routes;
mod state;

use crate::config::AppConfig;
use crate::state::AppState;
use collection_backup::scheduler::{self, BackupScheduler};
use collection_backup::{BackupService, Config};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!("Starting backup server on port {}", config.port);

    let engine = match &config.backup_config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let service = Arc::new(BackupService::from_config(&engine)?);

    // Persisted schedule edits win over the file
    let state_path = engine.scheduler_state_path();
    let schedule = scheduler::load_config(&state_path)
        .await?
        .unwrap_or_else(|| engine.scheduler.clone());
    let scheduler = Arc::new(BackupScheduler::new(service.clone(), schedule).persist_to(state_path));
    if let Err(e) = scheduler.start().await {
        tracing::warn!("Failed to start scheduler: {}", e);
    }

    let state = Arc::new(AppState::new(service, scheduler.clone()));
    let app = routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    if let Err(e) = scheduler.stop().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
