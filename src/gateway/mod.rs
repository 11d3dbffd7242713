//! Gateway: turns one inbound call into one request/reply exchange.
//!
//! Per call the gateway opens its own channel and reply queue, subscribes
//! before publishing, and races both the publish and the reply against one
//! deadline. The channel is closed exactly once whichever side wins.

pub mod errmsg;
mod router;

pub use router::{error_response, router};

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::broker::MessageProperties;
use crate::config::GatewayConfig;
use crate::rpc::{CorrelationId, Result, RpcChannel, RpcError};
use crate::supervisor::ConnectionContext;
use crate::utils::cancel::CancellationToken;

/// Front-facing side of the RPC protocol.
#[derive(Clone)]
pub struct Gateway {
    ctx: ConnectionContext,
    config: Arc<GatewayConfig>,
}

impl Gateway {
    pub fn new(ctx: ConnectionContext, config: GatewayConfig) -> Self {
        Self {
            ctx,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Send `job` to a worker and wait for its reply.
    #[instrument(skip_all, fields(correlation_id = tracing::field::Empty))]
    pub async fn call(&self, job: &Value) -> Result<Value> {
        let id = CorrelationId::mint();
        tracing::Span::current().record("correlation_id", id.as_str());

        let mut channel = RpcChannel::create(&self.ctx).await?;
        let result = self.exchange(&mut channel, &id, job).await;
        channel.close().await;
        result
    }

    async fn exchange(
        &self,
        channel: &mut RpcChannel,
        id: &CorrelationId,
        job: &Value,
    ) -> Result<Value> {
        let reply_queue = channel.declare_reply_queue().await?;
        let listener = channel.listen(&reply_queue, id).await?;

        let timeout = self.config.timeout();
        let deadline = CancellationToken::new();
        let timer = deadline.cancel_after(timeout);

        let properties = MessageProperties::default()
            .with_correlation_id(id.as_str())
            .with_reply_to(reply_queue.as_str());
        let publish = channel.publish(
            &self.config.work_queue,
            job,
            properties,
            self.config.publish_retries,
            self.config.publish_backoff(),
        );
        tokio::select! {
            biased;
            published = publish => published?,
            _ = deadline.cancelled() => {
                warn!(
                    correlation_id = %id,
                    timeout = ?timeout,
                    "Publish not confirmed before deadline"
                );
                return Err(RpcError::Timeout(timeout));
            }
        }
        info!(correlation_id = %id, reply_queue = %reply_queue, "Job sent to work queue");

        tokio::select! {
            biased;
            reply = listener.recv() => {
                timer.disarm();
                reply?.into_result()
            }
            _ = deadline.cancelled() => {
                warn!(correlation_id = %id, timeout = ?timeout, "No reply before deadline");
                Err(RpcError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests;
