//! Process-wide connection handle.
//!
//! Created once at startup and passed by reference to the gateway, the worker
//! and the supervisor. The supervisor installs a connection when one is
//! established and clears it when the broker reports an error; everyone else
//! only reads it to open channels.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::broker::{BrokerError, Connection};

/// Shared slot holding the current broker connection.
#[derive(Clone, Default)]
pub struct ConnectionContext {
    current: Arc<RwLock<Option<Arc<dyn Connection>>>>,
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connection` the one new channels are opened on.
    pub async fn install(&self, connection: Arc<dyn Connection>) {
        *self.current.write().await = Some(connection);
    }

    /// Forget the current connection without closing it.
    pub async fn clear(&self) -> Option<Arc<dyn Connection>> {
        self.current.write().await.take()
    }

    /// The current connection, or `NotConnected`.
    pub async fn connection(&self) -> Result<Arc<dyn Connection>, BrokerError> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)
    }

    pub async fn is_connected(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Clear and close the current connection.
    pub async fn teardown(&self) {
        if let Some(connection) = self.clear().await {
            match connection.close().await {
                Ok(()) => info!("Broker connection closed"),
                Err(e) => error!(error = %e, "Error closing broker connection"),
            }
        }
    }
}
