use crate::config::Config;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use efes_core::{
    CreateCloseOperation, CreateOpenOperation, DeleteKeyOperation, DeviceClient, EfesError,
    GetPathsOperation, InventoryOperation, ReclaimOperation, Registry, Result, SqliteRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tower_http::trace::TraceLayer;

mod handlers;
mod types;

use handlers::{create_close, create_open, delete_key, get_devices, get_hosts, get_paths};
pub(crate) use types::*;

pub struct TrackerState {
    pub(crate) create_open_operation: CreateOpenOperation,
    pub(crate) create_close_operation: CreateCloseOperation,
    pub(crate) get_paths_operation: GetPathsOperation,
    pub(crate) delete_key_operation: DeleteKeyOperation,
    pub(crate) inventory_operation: InventoryOperation,
}

pub fn build_router(registry: Arc<dyn Registry>) -> Router {
    let state = Arc::new(TrackerState {
        create_open_operation: CreateOpenOperation::new(registry.clone()),
        create_close_operation: CreateCloseOperation::new(registry.clone()),
        get_paths_operation: GetPathsOperation::new(registry.clone()),
        delete_key_operation: DeleteKeyOperation::new(registry.clone()),
        inventory_operation: InventoryOperation::new(registry),
    });

    Router::new()
        .route("/get-devices", get(get_devices))
        .route("/get-hosts", get(get_hosts))
        .route("/get-paths", get(get_paths))
        .route("/create-open", post(create_open))
        .route("/create-close", post(create_close))
        .route("/delete", post(delete_key))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_tracker(config: Config) -> Result<()> {
    let registry: Arc<dyn Registry> = Arc::new(SqliteRegistry::open(&config.database.path)?);

    spawn_reclaim_sweep(&config, registry.clone())?;

    let app = build_router(registry);
    let listener = TcpListener::bind(&config.tracker.listen_address).await?;
    tracing::info!("Efes tracker listening on {}", config.tracker.listen_address);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight requests");
    let _ = shutdown_tx.send(());

    // In-flight requests get the configured grace period to complete; after
    // that, remaining connections are closed forcibly.
    let grace = Duration::from_millis(config.tracker.shutdown_timeout_ms);
    match tokio::time::timeout(grace, &mut server_task).await {
        Ok(joined) => {
            joined
                .map_err(|error| EfesError::Internal(format!("server task failed: {}", error)))?
                .map_err(EfesError::Io)?;
        }
        Err(_) => {
            tracing::warn!(
                "grace period of {}ms expired, closing remaining connections",
                config.tracker.shutdown_timeout_ms
            );
            server_task.abort();
        }
    }

    Ok(())
}

fn spawn_reclaim_sweep(config: &Config, registry: Arc<dyn Registry>) -> Result<()> {
    let device_client = DeviceClient::new(Duration::from_millis(config.client.timeout_ms))?;
    let pending_ttl = chrono::Duration::milliseconds(config.tracker.pending_file_ttl_ms as i64);
    let sweep_interval = Duration::from_millis(config.tracker.sweep_interval_ms.max(1));
    let operation = ReclaimOperation::new(registry, device_client, pending_ttl);

    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        loop {
            ticker.tick().await;
            match operation.run().await {
                Ok(result)
                    if result.pending_expired > 0
                        || result.files_reclaimed > 0
                        || result.tombstones_purged > 0 =>
                {
                    tracing::info!(
                        "reclamation sweep: {} pending expired, {} files reclaimed, {} tombstones purged",
                        result.pending_expired,
                        result.files_reclaimed,
                        result.tombstones_purged
                    );
                }
                Ok(_) => {}
                Err(error) => tracing::warn!("reclamation sweep failed: {}", error),
            }
        }
    });

    Ok(())
}

pub(crate) fn response_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}
