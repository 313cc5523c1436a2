use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use sqlbridge::config::Settings;
use sqlbridge::connection_manager::ConnectionManager;
use sqlbridge::server::{create_app, AppState};
use sqlbridge::shutdown::GracefulShutdown;
use sqlbridge::tasks::PoolMaintenanceTask;
use sqlbridge::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("Failed to load configuration")?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.otel, settings.is_json_logging())?;
    tracing::info!("Configuration loaded");

    let connection_manager = Arc::new(
        ConnectionManager::from_settings(&settings).context("Failed to build connection pools")?,
    );
    if connection_manager.backends().is_empty() {
        tracing::warn!("No database backend configured; set POSTGRES__URL or SQLSERVER__SERVER");
    }

    // Warm pools up to min_idle; an unreachable backend is not fatal at startup
    connection_manager.maintain().await;

    tokio::fs::create_dir_all(&settings.server.uploads_dir)
        .await
        .with_context(|| format!("Failed to create {}", settings.server.uploads_dir))?;

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start pool maintenance in background
    let maintenance_task = PoolMaintenanceTask::new(
        settings.pool.maintenance_interval(),
        connection_manager.clone(),
        shutdown_tx.subscribe(),
    );
    let maintenance_handle = tokio::spawn(async move {
        maintenance_task.run().await;
    });

    // Create application state
    let state = AppState::new(settings.clone(), connection_manager.clone());
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    GracefulShutdown::new(connection_manager, shutdown_tx)
        .execute("server stopped")
        .await;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = maintenance_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
