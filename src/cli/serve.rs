use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::audit::TracingAuditSink;
use crate::bootstrap::Bootstrap;
use crate::config::Settings;
use crate::server::{AppState, create_router};
use crate::ssh::LocalBackend;
use crate::store::{DirectoryStore, SqliteStore};
use crate::usage::{CounterProjection, TaskQueue, UsageCoordinator, UsageLedger};

/// Serves the HTTP API and runs the usage pipeline until Ctrl-C.
pub async fn run_serve(settings: Settings) -> anyhow::Result<()> {
    let token_file = settings.server.admin_token_path();
    if !token_file.exists() {
        bail!(
            "Server not initialized. Run 'tenantgate admin init' first to create the database and admin token."
        );
    }

    let store = Arc::new(SqliteStore::new(settings.server.db_path())?);
    store.initialize()?;
    if !store.has_admin_token()? {
        bail!(
            "Server not initialized. Run 'tenantgate admin init' first to create the database and admin token."
        );
    }

    info!("Admin token available at {}", token_file.display());

    if settings.source_control.role_mode_enabled {
        Bootstrap {
            tenants: store.as_ref(),
            directory: store.as_ref(),
            policy: store.as_ref(),
        }
        .run()?;
    }

    let cancel = CancellationToken::new();
    let usage = &settings.usage;
    let coordinator = Arc::new(UsageCoordinator::new(
        TaskQueue::new(store.clone()),
        UsageLedger::new(store.clone()),
    ));
    let projection = Arc::new(CounterProjection::new(store.clone(), store.clone()));
    let background = [
        tokio::spawn(coordinator.run(
            Duration::from_secs(usage.drain_interval_secs),
            Duration::from_secs(usage.stale_lock_secs),
            cancel.clone(),
        )),
        tokio::spawn(projection.run(
            Duration::from_secs(usage.reconcile_interval_secs),
            cancel.clone(),
        )),
    ];

    let repo_root = settings.ssh.repo_root(&settings.server.data_dir);
    std::fs::create_dir_all(&repo_root)?;
    let addr = settings.server.socket_addr()?;
    let state = Arc::new(AppState::new(
        store,
        settings,
        Arc::new(TracingAuditSink),
        Arc::new(LocalBackend::new(repo_root)),
    )?);
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
        shutdown.cancel();
    })
    .await?;

    cancel.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            error!("Background task failed: {}", e);
        }
    }
    Ok(())
}
