//! Prometheus metrics and the HTTP endpoint exposing them.

pub mod metrics;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serves `/metrics` on `port` until `shutdown` fires.
pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics::metrics_handler));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    info!("Metrics available at port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
