use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use eyre::Result;
use tracing::info;

use crate::CoreMetrics;

/// Serve the prometheus exposition endpoint on the configured port.
///
/// Runs until the process exits; intended to be spawned next to the worker
/// tasks.
pub async fn serve_metrics(metrics: Arc<CoreMetrics>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], metrics.listen_port()));
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Serving metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn render_metrics(State(metrics): State<Arc<CoreMetrics>>) -> impl IntoResponse {
    match metrics.gather() {
        Ok(buf) => (StatusCode::OK, buf).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
