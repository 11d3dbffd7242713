//! Message broker abstraction.
//!
//! This module contains:
//! - `Connector` / `Connection` / `Channel` traits: the subset of an AMQP
//!   broker the RPC layer drives (queues, publish, consume, acknowledgement)
//! - Message and queue types shared by every implementation
//! - Implementations: AMQP (RabbitMQ), in-memory

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::{AmqpConnection, AmqpConnector};
pub use memory::MemoryBroker;

/// Well-known queue the workers drain.
pub const WORK_QUEUE: &str = "transaction";

/// Content type attached to every JSON payload.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised by the broker transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("No broker connection available")]
    NotConnected,

    #[error("Channel failed: {0}")]
    Channel(String),

    #[error("Queue declaration failed: {0}")]
    Declare(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("Channel is closed")]
    Closed,
}

// ============================================================================
// Messages
// ============================================================================

/// Properties carried alongside a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Token linking a request to its reply.
    pub correlation_id: Option<String>,
    /// Queue the reply should be published to.
    pub reply_to: Option<String>,
    /// MIME type of the payload.
    pub content_type: Option<String>,
}

impl MessageProperties {
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A payload plus its properties, as published or delivered.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Raw bytes, expected to be UTF-8 JSON.
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>, properties: MessageProperties) -> Self {
        Self {
            payload: payload.into(),
            properties,
        }
    }
}

// ============================================================================
// Queues and deliveries
// ============================================================================

/// Options for declaring a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue name. Empty asks the broker to generate one.
    pub name: String,
    /// Owned by the declaring connection; nobody else may consume it.
    pub exclusive: bool,
    /// Deleted once its owner goes away.
    pub auto_delete: bool,
    /// Survives broker restarts.
    pub durable: bool,
}

impl QueueOptions {
    /// Server-named, exclusive, auto-deleted queue for a single reply.
    pub fn reply() -> Self {
        Self {
            name: String::new(),
            exclusive: true,
            auto_delete: true,
            durable: false,
        }
    }

    /// Shared queue drained by competing consumers.
    pub fn work(name: impl Into<String>, durable: bool) -> Self {
        Self {
            name: name.into(),
            exclusive: false,
            auto_delete: false,
            durable,
        }
    }
}

/// How deliveries on a consumer are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker treats every message as consumed once delivered.
    Auto,
    /// The consumer must ack or reject each delivery.
    Manual,
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn reject(&self, requeue: bool) -> Result<()>;
}

/// Acknowledger for deliveries that were settled on receipt.
pub struct NoopAcknowledger;

#[async_trait]
impl Acknowledger for NoopAcknowledger {
    async fn ack(&self) -> Result<()> {
        Ok(())
    }

    async fn reject(&self, _requeue: bool) -> Result<()> {
        Ok(())
    }
}

/// A message handed to a consumer.
pub struct Delivery {
    pub message: Message,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, acker: Box<dyn Acknowledger>) -> Self {
        Self { message, acker }
    }

    /// Mark the delivery as consumed.
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    /// Refuse the delivery, optionally asking the broker to redeliver it.
    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from one consumer. Ends when the consumer is cancelled.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

// ============================================================================
// Traits
// ============================================================================

/// A flow-control session multiplexed over a connection.
///
/// Implementations must be safe to share, but callers drive a channel from one
/// operation at a time.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare a queue and return its (possibly server-generated) name.
    async fn declare_queue(&self, options: &QueueOptions) -> Result<String>;

    /// Limit unacknowledged deliveries outstanding on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Publish to a queue through the default exchange.
    ///
    /// Resolves once the broker has confirmed the message. Publishing to a
    /// queue that does not exist is not an error: the broker drops it.
    async fn publish(&self, queue: &str, message: Message) -> Result<()>;

    /// Start consuming a queue.
    async fn consume(&self, queue: &str, mode: AckMode) -> Result<DeliveryStream>;

    /// Close the channel. Exclusive queues it owns are deleted.
    async fn close(&self) -> Result<()>;
}

/// A live session to the broker.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>>;

    /// Resolves with the error once the connection reports one asynchronously.
    async fn closed(&self) -> BrokerError;

    async fn close(&self) -> Result<()>;
}

/// Establishes connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Where this connector points, for logging. Never includes credentials.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn Connection>>;
}
