//! # Weather Server
//!
//! Ingests weather readings, serves point and range queries, and pushes every
//! newly submitted reading to live WebSocket subscribers.
//!
//! ## Startup
//! config → logging → store (schema) → broadcast hub → startup batch file
//! (own task) → HTTP server.
//!
//! ## Shutdown
//! SIGINT/SIGTERM cancel the root token: the HTTP server drains, an in-flight
//! batch stops at the next line, and the hub releases every subscriber. The
//! process waits for the hub for at most `shutdown_grace_seconds`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lib_weather::api::{router, AppState};
use lib_weather::connections::PgStore;
use lib_weather::{BroadcastHub, MemoryStore, Store};

mod weather_logic;
use weather_logic::config::{self, Settings, StoreKind};
use weather_logic::logger;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::load_config()?;
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    info!(
        port = settings.port,
        store = ?settings.store,
        config_file = ?settings.config_file,
        "server_weather starting"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    match settings.store {
        StoreKind::Memory => run(Arc::new(MemoryStore::new()), &settings, shutdown).await,
        StoreKind::Postgres => {
            let url = settings
                .database_url
                .as_deref()
                .context("store = postgres needs a database URL")?;
            let store = PgStore::connect(url, settings.db_max_connections)?;
            store.ping().await.context("database unreachable")?;
            store.ensure_schema().await?;
            run(Arc::new(store), &settings, shutdown).await
        }
    }
}

async fn run<S: Store>(store: Arc<S>, settings: &Settings, shutdown: CancellationToken) -> Result<()> {
    let (hub, hub_task) = BroadcastHub::spawn(settings.hub.clone(), &shutdown);
    let state = Arc::new(AppState::new(store, hub));

    let batch = spawn_batch_ingest(
        Arc::clone(&state),
        settings.data_file.clone(),
        shutdown.child_token(),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    // The server may also have stopped on its own.
    shutdown.cancel();
    served.context("http server failed")?;

    if let Err(e) = batch.await {
        warn!(error = %e, "batch ingestion task failed");
    }
    match tokio::time::timeout(settings.shutdown_grace, hub_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "hub task failed"),
        Err(_) => warn!(grace = ?settings.shutdown_grace, "hub did not stop within grace period"),
    }

    info!("Shutdown complete.");
    Ok(())
}

fn spawn_batch_ingest<S: Store>(
    state: Arc<AppState<S>>,
    path: PathBuf,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !path.exists() {
            info!(path = %path.display(), "no batch file, skipping startup ingestion");
            return;
        }
        // The coordinator logs the outcome.
        let _ = state.coordinator.ingest_batch(&path, &cancel).await;
    })
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => info!("SIGTERM received, initiating shutdown."),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
