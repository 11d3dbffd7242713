//! Bootstrap utilities for courier binaries.
//!
//! Shared initialization code for the gateway, worker and client.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with COURIER_LOG environment variable.
///
/// Defaults to "info" level if COURIER_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Connect to the configured broker and keep `ctx` attached to it.
///
/// Exits the process with status 1 if the broker cannot be reached.
#[cfg(feature = "amqp")]
pub async fn supervise_or_exit(
    config: &crate::config::Config,
    ctx: &crate::supervisor::ConnectionContext,
) -> crate::supervisor::SupervisorHandle {
    use std::sync::Arc;

    use crate::broker::AmqpConnector;
    use crate::supervisor::ConnectionSupervisor;

    let connector = Arc::new(AmqpConnector::new(config.broker.url()));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        connector,
        config.supervisor.clone(),
    ));

    match supervisor.start(ctx.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Could not connect to broker");
            std::process::exit(1);
        }
    }
}
