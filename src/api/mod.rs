//! Read-only HTTP API over stored delegations, plus the metrics endpoint.

mod handlers;
mod types;

use crate::config::ServerConfig;
use crate::repositories::DelegationStore;
use axum::{middleware, routing::get, Router};
use handlers::ApiState;
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub fn router(store: Arc<dyn DelegationStore>) -> Router {
    let state: ApiState = store;
    Router::new()
        .route("/delegations", get(handlers::get_delegations))
        .route("/delegations/:year", get(handlers::get_delegations_by_year))
        .route_layer(middleware::from_fn(handlers::track_requests))
        .with_state(state)
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(handlers::metrics_handler))
}

async fn serve(
    name: &str,
    host: &str,
    port: u16,
    app: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("{} listening on http://{}", name, listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// Serves the API and the metrics endpoint until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    store: Arc<dyn DelegationStore>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let api = serve("API server", &config.host, config.port, router(store), cancel.clone());
    let metrics = serve(
        "Metrics server",
        &config.host,
        config.metrics_port,
        metrics_router(),
        cancel,
    );
    tokio::try_join!(api, metrics)?;
    Ok(())
}
