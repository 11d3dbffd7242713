//! Broker connection supervision.
//!
//! Establishes the shared connection with a bounded number of attempts and a
//! fixed pause between them, then watches it. When a live connection reports
//! an error the supervisor drops it and starts over with a fresh budget.
//!
//! Running out of attempts is fatal: the supervisor reports
//! [`SupervisorError::Exhausted`] and the binaries exit the process.

mod context;

pub use context::ConnectionContext;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{BrokerError, Connection, Connector};
use crate::config::SupervisorConfig;
use crate::utils::cancel::CancellationToken;

/// Errors that end supervision.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Broker unreachable after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Supervision task failed: {0}")]
    Task(String),
}

/// Keeps a [`ConnectionContext`] attached to the broker.
pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    config: SupervisorConfig,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn Connector>, config: SupervisorConfig) -> Self {
        Self { connector, config }
    }

    /// Try to connect up to `max_attempts` times, pausing `retry_delay` between failures.
    pub async fn connect(&self, max_attempts: u32) -> Result<Arc<dyn Connection>, SupervisorError> {
        let endpoint = self.connector.endpoint();

        if max_attempts == 0 {
            error!(endpoint = %endpoint, "Max retries reached, giving up");
            return Err(SupervisorError::Exhausted {
                attempts: 0,
                last_error: "no attempts allowed".to_string(),
            });
        }

        let attempt = AtomicU32::new(0);
        let backoff = ConstantBuilder::default()
            .with_delay(self.config.retry_delay())
            .with_max_times((max_attempts - 1) as usize);

        let counter = &attempt;
        let connector = &self.connector;
        let target = endpoint.as_str();
        let result = (move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            info!(endpoint = %target, attempt = n, max_attempts, "Connecting to broker");
            connector.connect().await
        })
        .retry(backoff)
        .notify(|err: &BrokerError, delay: Duration| {
            let left = max_attempts.saturating_sub(attempt.load(Ordering::SeqCst));
            warn!(
                endpoint = %endpoint,
                error = %err,
                delay = ?delay,
                retries_left = left,
                "Failed to connect to broker, retrying"
            );
        })
        .await;

        match result {
            Ok(connection) => {
                info!(endpoint = %endpoint, "Broker connection established");
                Ok(connection)
            }
            Err(e) => {
                error!(
                    endpoint = %endpoint,
                    attempts = max_attempts,
                    error = %e,
                    "Max retries reached, giving up"
                );
                Err(SupervisorError::Exhausted {
                    attempts: max_attempts,
                    last_error: e.to_string(),
                })
            }
        }
    }

    /// Connect with the default budget, install the connection into `ctx`,
    /// and keep it attached in a background task.
    pub async fn start(
        self: Arc<Self>,
        ctx: ConnectionContext,
    ) -> Result<SupervisorHandle, SupervisorError> {
        let connection = self.connect(self.config.max_attempts).await?;
        ctx.install(connection.clone()).await;

        let stop = CancellationToken::new();
        let task = tokio::spawn(self.supervise(ctx, connection, stop.clone()));

        Ok(SupervisorHandle { stop, task })
    }

    async fn supervise(
        self: Arc<Self>,
        ctx: ConnectionContext,
        mut connection: Arc<dyn Connection>,
        stop: CancellationToken,
    ) -> Result<(), SupervisorError> {
        loop {
            let failure = tokio::select! {
                err = connection.closed() => Some(err),
                _ = stop.cancelled() => None,
            };
            let Some(err) = failure else {
                info!("Connection supervision stopped");
                return Ok(());
            };

            error!(error = %err, "Broker connection error");
            ctx.clear().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                _ = stop.cancelled() => return Ok(()),
            }

            info!("Retrying connection");
            connection = self.connect(self.config.max_attempts).await?;
            ctx.install(connection.clone()).await;
        }
    }
}

/// Running supervision task. Supervision continues if the handle is dropped.
pub struct SupervisorHandle {
    stop: CancellationToken,
    task: JoinHandle<Result<(), SupervisorError>>,
}

impl SupervisorHandle {
    /// Ask the supervision task to stop; does not close the connection.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the supervision task to end.
    ///
    /// Returns `Exhausted` if a reconnect sequence ran out of attempts.
    pub async fn wait(self) -> Result<(), SupervisorError> {
        self.task
            .await
            .map_err(|e| SupervisorError::Task(e.to_string()))?
    }

    /// Like [`wait`](Self::wait) but borrows the handle, for use in `select!`.
    pub async fn finished(&mut self) -> Result<(), SupervisorError> {
        (&mut self.task)
            .await
            .map_err(|e| SupervisorError::Task(e.to_string()))?
    }
}
