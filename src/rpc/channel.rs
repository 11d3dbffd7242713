//! Per-call broker channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::listener::ReplyListener;
use super::{CorrelationId, Result, RpcError};
use crate::broker::{
    AckMode, BrokerError, Channel, Message, MessageProperties, QueueOptions, JSON_CONTENT_TYPE,
};
use crate::supervisor::ConnectionContext;

/// Added to the caller's backoff between publish attempts.
pub const PUBLISH_BACKOFF_STEP: Duration = Duration::from_millis(250);

pub const DEFAULT_PUBLISH_RETRIES: u32 = 5;

pub const DEFAULT_PUBLISH_BACKOFF: Duration = Duration::from_millis(500);

/// Open channel shared between an [`RpcChannel`] and its listener.
/// `None` once closed.
pub(super) type ChannelSlot = Arc<Mutex<Option<Arc<dyn Channel>>>>;

/// Close whatever channel the slot holds. Later calls find it empty.
pub(super) async fn close_slot(slot: &ChannelSlot) {
    let Some(channel) = slot.lock().await.take() else {
        debug!("Channel already closed");
        return;
    };
    match channel.close().await {
        Ok(()) => info!("Channel closed"),
        Err(e) => error!(error = %e, "Error closing channel"),
    }
}

/// One broker channel, driven through a single request/reply exchange.
///
/// Mutating operations take `&mut self` so a channel is never used by two
/// operations at once.
pub struct RpcChannel {
    slot: ChannelSlot,
}

impl RpcChannel {
    /// Open a channel on the context's current connection.
    pub async fn create(ctx: &ConnectionContext) -> Result<Self> {
        let connection = ctx.connection().await.map_err(RpcError::Channel)?;
        let channel = connection.create_channel().await.map_err(|e| {
            error!(error = %e, "Failed to create channel");
            RpcError::Channel(e)
        })?;
        debug!("Channel created");

        Ok(Self {
            slot: Arc::new(Mutex::new(Some(channel))),
        })
    }

    async fn channel(&self) -> Result<Arc<dyn Channel>> {
        self.slot
            .lock()
            .await
            .clone()
            .ok_or(RpcError::Channel(BrokerError::Closed))
    }

    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Declare an exclusive, auto-deleted, server-named queue for one reply.
    pub async fn declare_reply_queue(&mut self) -> Result<String> {
        self.declare_queue(&QueueOptions::reply()).await
    }

    pub async fn declare_queue(&mut self, options: &QueueOptions) -> Result<String> {
        let channel = self.channel().await?;
        let name = channel
            .declare_queue(options)
            .await
            .map_err(RpcError::Channel)?;
        debug!(queue = %name, "Queue declared");
        Ok(name)
    }

    /// Limit unacknowledged deliveries outstanding on this channel.
    pub async fn set_prefetch(&mut self, count: u16) -> Result<()> {
        let channel = self.channel().await?;
        channel.set_prefetch(count).await.map_err(RpcError::Channel)
    }

    /// Publish `message` as JSON to `queue`, retrying transport failures.
    ///
    /// Makes at most `retries + 1` attempts, pausing `backoff + 250ms` between
    /// them.
    #[instrument(
        skip(self, message, properties, backoff),
        fields(correlation_id = tracing::field::Empty)
    )]
    pub async fn publish<T: Serialize + ?Sized>(
        &mut self,
        queue: &str,
        message: &T,
        properties: MessageProperties,
        retries: u32,
        backoff: Duration,
    ) -> Result<()> {
        if let Some(id) = properties.correlation_id.as_deref() {
            tracing::Span::current().record("correlation_id", id);
        }

        let payload = serde_json::to_vec(message)?;
        let properties = properties.with_content_type(JSON_CONTENT_TYPE);
        let channel = self.channel().await?;

        let policy = ConstantBuilder::default()
            .with_delay(backoff + PUBLISH_BACKOFF_STEP)
            .with_max_times(retries as usize);

        let attempt = AtomicU32::new(0);
        let counter = &attempt;
        let channel = &channel;
        let payload = &payload;
        let properties = &properties;
        let result = (move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            channel
                .publish(queue, Message::new(payload.clone(), properties.clone()))
                .await
        })
        .retry(policy)
        .notify(|err: &BrokerError, delay: Duration| {
            let made = attempt.load(Ordering::SeqCst);
            warn!(
                queue = %queue,
                error = %err,
                delay = ?delay,
                retries_left = retries.saturating_sub(made.saturating_sub(1)),
                "Publish failed, retrying"
            );
        })
        .await;

        match result {
            Ok(()) => {
                info!(queue = %queue, "Message sent");
                Ok(())
            }
            Err(source) => {
                error!(queue = %queue, retries, error = %source, "Failed to send message");
                Err(RpcError::Publish {
                    queue: queue.to_string(),
                    retries,
                    source,
                })
            }
        }
    }

    /// Subscribe to `queue` for the reply matching `correlation_id`.
    ///
    /// The consumer is registered before this returns, so a job published
    /// afterwards cannot have its reply missed.
    pub async fn listen(
        &mut self,
        queue: &str,
        correlation_id: &CorrelationId,
    ) -> Result<ReplyListener> {
        let channel = self.channel().await?;
        let deliveries = channel
            .consume(queue, AckMode::Manual)
            .await
            .map_err(RpcError::Channel)?;
        debug!(queue = %queue, correlation_id = %correlation_id, "Listening for reply");

        Ok(ReplyListener::new(
            deliveries,
            correlation_id.clone(),
            self.slot.clone(),
        ))
    }

    /// Close the channel if still open. Errors are logged, never returned.
    pub async fn close(&mut self) {
        close_slot(&self.slot).await;
    }
}
