//! Palisade disaster-recovery daemon
//!
//! Runs the engine loop (backup scheduling, health checks, recovery tests,
//! retention) and serves the machine API in `palisade_worker::handler`.
//!
//! # Configuration
//!
//! Environment variables are documented on [`WorkerConfig`]; log output is
//! controlled by `RUST_LOG` and `PALISADE_LOG_FORMAT`.

use anyhow::{anyhow, Context, Result};
use palisade_core::TenantId;
use palisade_storage::migrations::run_migrations;
use palisade_storage::postgres::SYSTEM_TENANT;
use palisade_storage::{
    FsObjectStore, GuardedObjectStore, MemoryStore, MetadataStore, ObjectStore, PostgresStore,
};
use palisade_worker::config::{mask_password, WorkerConfig};
use palisade_worker::control_plane::ControlPlaneClient;
use palisade_worker::handler::router;
use palisade_worker::services::Services;
use palisade_worker::tracing_config::{init_tracing, TracingConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&TracingConfig::default()).map_err(|e| anyhow!(e))?;

    info!("Starting Palisade worker");

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    info!(
        database_url = %config.database_url.as_deref().map(mask_password).unwrap_or_else(|| "<memory>".to_string()),
        tenant = ?config.tenant,
        control_plane = %config.control_plane_url,
        regions = config.primary_regions.len(),
        port = config.port,
        "Configuration loaded"
    );

    let store: Arc<dyn MetadataStore> = match &config.database_url {
        Some(url) => {
            let tenant = config
                .tenant
                .clone()
                .unwrap_or_else(|| TenantId::new(SYSTEM_TENANT));
            let postgres = PostgresStore::connect(url, tenant)
                .await
                .context("Failed to connect to the metadata database")?;
            run_migrations(postgres.pool())
                .await
                .context("Failed to apply metadata migrations")?;
            Arc::new(postgres)
        }
        None => {
            warn!("DATABASE_URL not set, metadata is kept in memory and lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let objects: Arc<dyn ObjectStore> = Arc::new(GuardedObjectStore::from_env(
        FsObjectStore::new(config.backup_root.clone())
            .await
            .with_context(|| {
                format!(
                    "Failed to open backup root {}",
                    config.backup_root.display()
                )
            })?,
    ));

    let control = Arc::new(ControlPlaneClient::new(
        config.control_plane_url.clone(),
        config.control_plane_timeout,
    )?);

    let drill_control = config
        .drill_environment
        .as_ref()
        .map(|environment| Arc::new(control.for_environment(environment)));
    let services = Services::wire(&config, store, objects, control, drill_control)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = services.engine.clone();
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    let app = router(services.app_state())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(RequestBodyLimitLayer::new(1024 * 1024));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, draining engine");
    let _ = shutdown_tx.send(true);
    engine_task.await.context("Engine task panicked")?;

    info!("Palisade worker shut down gracefully");
    Ok(())
}

/// Waits for SIGTERM or Ctrl-C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl-C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
