//! courier-gateway: HTTP front end
//!
//! Accepts `POST /` with a JSON object, hands it to a worker through the
//! broker and responds with the worker's reply.
//!
//! ## Architecture
//! ```text
//! [Client] --HTTP--> [courier-gateway] --"transaction"--> [courier-worker]
//!    ^                      ^                                   |
//!    |                      +------ exclusive reply queue <-----+
//!    +------ reply / 504 ---+
//! ```
//!
//! ## Configuration
//! - `broker.*` / `RABBITMQ_HOST`, `RABBITMQ_PORT`, `RABBITMQ_USER`, `RABBITMQ_PASS`
//! - `gateway.port` / `PORT` (default: 8080)
//! - `gateway.timeout_ms`: reply deadline (default: 300000)
//! - `COURIER_LOG`: log filter (default: info)

use tracing::{error, info};

use courier::config::Config;
use courier::gateway::{router, Gateway};
use courier::supervisor::ConnectionContext;
use courier::utils::bootstrap::{init_tracing, shutdown_signal, supervise_or_exit};
use courier::utils::cancel::CancellationToken;
use courier::utils::http::serve;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting courier-gateway");

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let ctx = ConnectionContext::new();
    let shutdown = CancellationToken::new();

    let app = router(Gateway::new(ctx.clone(), config.gateway.clone()));
    let addr = config.gateway.bind_address();
    let token = shutdown.clone();
    let mut server = tokio::spawn(async move { serve(&addr, app, token).await });

    let mut supervisor = supervise_or_exit(&config, &ctx).await;

    tokio::select! {
        result = supervisor.finished() => {
            if let Err(e) = result {
                error!(error = %e, "Broker connection lost for good");
                std::process::exit(1);
            }
        }
        result = &mut server => {
            error!("HTTP server stopped unexpectedly");
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    shutdown.cancel();
    supervisor.stop();
    server.await??;
    ctx.teardown().await;

    info!("courier-gateway stopped");
    Ok(())
}
