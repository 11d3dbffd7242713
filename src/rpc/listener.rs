//! One-shot reply consumer.

use futures::StreamExt;
use serde_json::Value;
use tracing::{error, info, warn};

use super::channel::{close_slot, ChannelSlot};
use super::{CorrelationId, Result, RpcError};
use crate::broker::{Delivery, DeliveryStream};

/// Outcome of a matched reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The reply body, parsed as JSON.
    Payload(Value),
    /// The reply matched but its body was not valid JSON.
    Malformed,
}

impl Reply {
    pub fn parse(payload: &[u8]) -> Self {
        match serde_json::from_slice(payload) {
            Ok(value) => Reply::Payload(value),
            Err(e) => {
                error!(error = %e, "Error parsing reply");
                Reply::Malformed
            }
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            Reply::Payload(value) => Ok(value),
            Reply::Malformed => Err(RpcError::MalformedReply),
        }
    }
}

/// Waits on a reply queue for the delivery carrying one correlation id.
///
/// Everything else on the queue is rejected without requeue. On a match the
/// delivery is acknowledged and the channel closed, so at most one reply is
/// ever handed out.
pub struct ReplyListener {
    deliveries: DeliveryStream,
    correlation_id: CorrelationId,
    slot: ChannelSlot,
}

impl ReplyListener {
    pub(super) fn new(
        deliveries: DeliveryStream,
        correlation_id: CorrelationId,
        slot: ChannelSlot,
    ) -> Self {
        Self {
            deliveries,
            correlation_id,
            slot,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Wait for the matching reply.
    ///
    /// Fails with `ListenerClosed` if the consumer ends first, e.g. because
    /// the channel was closed.
    pub async fn recv(mut self) -> Result<Reply> {
        while let Some(delivery) = self.deliveries.next().await {
            let delivery = delivery.map_err(|e| {
                error!(error = %e, "Reply consumer failed");
                RpcError::Channel(e)
            })?;

            if !is_match(&self.correlation_id, &delivery).await {
                continue;
            }

            let reply = Reply::parse(&delivery.message.payload);
            if let Err(e) = delivery.ack().await {
                error!(error = %e, "Failed to acknowledge reply");
            }
            close_slot(&self.slot).await;
            return Ok(reply);
        }

        Err(RpcError::ListenerClosed)
    }
}

/// Check a delivery's correlation id, discarding it if it is not `expected`.
///
/// Borrows only the id: the delivery stream is not `Sync`, and `recv` must stay `Send`.
async fn is_match(expected: &CorrelationId, delivery: &Delivery) -> bool {
    let matched = match delivery.message.properties.correlation_id.as_deref() {
        None => {
            warn!(expected = %expected, "Received message without correlation id");
            false
        }
        Some(received) if !expected.matches(received) => {
            info!(
                expected = %expected,
                received = %received,
                "Correlation id does not match, discarding message"
            );
            false
        }
        Some(_) => true,
    };

    if !matched {
        if let Err(e) = delivery.reject(false).await {
            error!(error = %e, "Failed to reject message");
        }
    }
    matched
}
