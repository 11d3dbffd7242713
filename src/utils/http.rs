//! HTTP plumbing shared by the gateway and worker binaries.

use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::cancel::CancellationToken;

/// Health check endpoint.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Router exposing only `GET /health`.
pub fn health_router() -> Router {
    Router::new().route("/health", axum::routing::get(health))
}

/// Bind `addr` and serve `app` with request tracing until `shutdown` is cancelled.
pub async fn serve(
    addr: &str,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app.layer(TraceLayer::new_for_http()))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
