//! courier-client: load generator
//!
//! Posts a sample transaction to the gateway every 2.5 seconds and logs the
//! reply. Each request may take up to five minutes.
//!
//! ## Configuration
//! - `client.server_host` / `SERVER_HOST` (default: localhost)
//! - `client.server_port` / `SERVER_PORT` (default: 8080)
//! - `client.interval_ms`, `client.timeout_ms`
//! - `COURIER_LOG`: log filter (default: info)

use tracing::{error, info};

use courier::client::Client;
use courier::config::Config;
use courier::utils::bootstrap::{init_tracing, shutdown_signal};
use courier::utils::cancel::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let client = Client::new(&config.client)?;
    info!(url = %client.url(), "Connecting to server");

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    client.run(config.client.interval(), shutdown).await;
    Ok(())
}
