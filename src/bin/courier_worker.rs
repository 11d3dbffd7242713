//! courier-worker: work queue consumer
//!
//! Competing consumer on the `transaction` queue. Each job is answered with
//! its own fields plus `"status": "success"` after the configured work delay,
//! on the job's reply queue and with its correlation id.
//!
//! ## Configuration
//! - `broker.*` / `RABBITMQ_HOST`, `RABBITMQ_PORT`, `RABBITMQ_USER`, `RABBITMQ_PASS`
//! - `worker.port` / `CONSUMER_PORT`: health endpoint port (default: 8085)
//! - `worker.work_delay_ms`: synthetic work per job (default: 3000)
//! - `worker.max_in_flight`: jobs accepted but not yet answered (default: 64)
//! - `COURIER_LOG`: log filter (default: info)

use tracing::{error, info};

use courier::config::Config;
use courier::supervisor::ConnectionContext;
use courier::utils::bootstrap::{init_tracing, shutdown_signal, supervise_or_exit};
use courier::utils::cancel::CancellationToken;
use courier::utils::http::{health_router, serve};
use courier::worker::Worker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting courier-worker");

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let ctx = ConnectionContext::new();
    let shutdown = CancellationToken::new();

    let addr = config.worker.bind_address();
    let token = shutdown.clone();
    let mut server = tokio::spawn(async move { serve(&addr, health_router(), token).await });

    let mut supervisor = supervise_or_exit(&config, &ctx).await;

    let worker = Worker::new(ctx.clone(), config.worker.clone());
    let token = shutdown.clone();
    let mut consumer = tokio::spawn(async move { worker.run(token).await });

    tokio::select! {
        result = supervisor.finished() => {
            if let Err(e) = result {
                error!(error = %e, "Broker connection lost for good");
                std::process::exit(1);
            }
        }
        result = &mut server => {
            error!("Health server stopped unexpectedly");
            result??;
        }
        _ = &mut consumer => {
            error!("Worker stopped unexpectedly");
        }
        _ = shutdown_signal() => {}
    }

    shutdown.cancel();
    supervisor.stop();
    if !consumer.is_finished() {
        consumer.await?;
    }
    if !server.is_finished() {
        server.await??;
    }
    ctx.teardown().await;

    info!("courier-worker stopped");
    Ok(())
}
