//! Request/reply over the broker.
//!
//! This module contains:
//! - `RpcChannel`: one broker channel driven through a single call
//!   (reply queue, retrying publish, one-shot listen, idempotent close)
//! - `ReplyListener`: waits on a reply queue for the matching correlation id
//! - `CorrelationId`: per-call token linking a job to its reply

mod channel;
mod correlation;
mod listener;

pub use channel::{
    RpcChannel, DEFAULT_PUBLISH_BACKOFF, DEFAULT_PUBLISH_RETRIES, PUBLISH_BACKOFF_STEP,
};
pub use correlation::CorrelationId;
pub use listener::{Reply, ReplyListener};

use std::time::Duration;

use crate::broker::BrokerError;

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Call-level failures.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Channel failed: {0}")]
    Channel(#[source] BrokerError),

    #[error("Failed to send message to queue {queue} after {retries} retries: {source}")]
    Publish {
        queue: String,
        retries: u32,
        #[source]
        source: BrokerError,
    },

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Reply was not valid JSON")]
    MalformedReply,

    #[error("Reply queue closed before a reply arrived")]
    ListenerClosed,

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
