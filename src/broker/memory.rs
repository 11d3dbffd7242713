//! In-memory broker for tests and local development.
//!
//! Mirrors the RabbitMQ behaviour the RPC layer relies on:
//! - each queue delivers a message to exactly one consumer (competing consumers)
//! - exclusive queues are deleted when the channel that declared them closes
//! - publishing to a missing queue silently drops the message
//! - closing a channel or breaking a connection ends its consumers
//!
//! Also carries fault injection (failing connects, failing or stalled
//! publishes, connection breaks) and counters so tests can observe exactly what reached the broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info};

use super::{
    AckMode, Acknowledger, BrokerError, Channel, Connection, Connector, Delivery, DeliveryStream,
    Message, NoopAcknowledger, QueueOptions, Result,
};

/// Fault counter value meaning "fail forever".
const ALWAYS: usize = usize::MAX;

/// Shared in-process broker. Clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    queues: RwLock<HashMap<String, QueueEntry>>,
    connections: Mutex<Vec<Weak<ConnectionState>>>,
    next_id: AtomicU64,
    connect_failures: AtomicUsize,
    publish_failures: AtomicUsize,
    publish_stalled: AtomicBool,
    stats: Stats,
}

#[derive(Default)]
struct Stats {
    connect_attempts: AtomicUsize,
    publish_attempts: AtomicUsize,
    published: AtomicUsize,
    acks: AtomicUsize,
    rejects: AtomicUsize,
    channel_closes: AtomicUsize,
}

struct QueueEntry {
    sender: mpsc::UnboundedSender<Message>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    /// Channel that owns an exclusive queue.
    owner: Option<u64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every connection attempt until reset.
    pub fn fail_connects_forever(&self) {
        self.fail_next_connects(ALWAYS);
    }

    /// Fail the next `count` publishes.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.publish_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every publish until reset.
    pub fn fail_publishes_forever(&self) {
        self.fail_next_publishes(ALWAYS);
    }

    /// Never confirm a publish: every publish hangs, like a blocked connection.
    pub fn stall_publishes(&self) {
        self.state.publish_stalled.store(true, Ordering::SeqCst);
    }

    /// Report an asynchronous error on every live connection and close its channels.
    pub async fn break_connections(&self, reason: &str) {
        let connections: Vec<_> = self
            .state
            .connections
            .lock()
            .await
            .drain(..)
            .filter_map(|c| c.upgrade())
            .collect();

        for connection in connections {
            connection.fail(reason, &self.state).await;
        }
    }

    /// Publish straight into a queue, bypassing channels and fault injection.
    pub async fn inject(&self, queue: &str, message: Message) -> bool {
        let queues = self.state.queues.read().await;
        match queues.get(queue) {
            Some(entry) => entry.sender.send(message).is_ok(),
            None => false,
        }
    }

    pub async fn queue_exists(&self, queue: &str) -> bool {
        self.state.queues.read().await.contains_key(queue)
    }

    pub async fn queue_count(&self) -> usize {
        self.state.queues.read().await.len()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.stats.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn publish_attempts(&self) -> usize {
        self.state.stats.publish_attempts.load(Ordering::SeqCst)
    }

    /// Publishes that were accepted by the broker.
    pub fn published(&self) -> usize {
        self.state.stats.published.load(Ordering::SeqCst)
    }

    pub fn acks(&self) -> usize {
        self.state.stats.acks.load(Ordering::SeqCst)
    }

    pub fn rejects(&self) -> usize {
        self.state.stats.rejects.load(Ordering::SeqCst)
    }

    /// Successful explicit channel closes.
    pub fn channel_closes(&self) -> usize {
        self.state.stats.channel_closes.load(Ordering::SeqCst)
    }
}

/// Consume one unit from a fault counter. Returns true when the operation should fail.
fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
            0 => None,
            ALWAYS => Some(ALWAYS),
            n => Some(n - 1),
        })
        .is_ok()
}

#[async_trait]
impl Connector for MemoryBroker {
    fn endpoint(&self) -> String {
        "memory://local".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        self.state
            .stats
            .connect_attempts
            .fetch_add(1, Ordering::SeqCst);

        if take_fault(&self.state.connect_failures) {
            return Err(BrokerError::Connection("connection refused".to_string()));
        }

        let (errors, _) = watch::channel(None);
        let connection = Arc::new(ConnectionState {
            broker: Arc::downgrade(&self.state),
            errors,
            channels: Mutex::new(Vec::new()),
        });
        self.state
            .connections
            .lock()
            .await
            .push(Arc::downgrade(&connection));

        Ok(Arc::new(MemoryConnection { state: connection }))
    }
}

// ============================================================================
// Connection
// ============================================================================

struct ConnectionState {
    broker: Weak<BrokerState>,
    errors: watch::Sender<Option<String>>,
    channels: Mutex<Vec<Arc<ChannelState>>>,
}

impl ConnectionState {
    fn failed(&self) -> bool {
        self.errors.borrow().is_some()
    }

    async fn fail(&self, reason: &str, broker: &BrokerState) {
        self.errors.send_replace(Some(reason.to_string()));
        let channels: Vec<_> = self.channels.lock().await.drain(..).collect();
        for channel in channels {
            channel.shutdown(broker).await;
        }
    }
}

/// Connection handed out by [`MemoryBroker`].
pub struct MemoryConnection {
    state: Arc<ConnectionState>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>> {
        let broker = self.state.broker.upgrade().ok_or(BrokerError::NotConnected)?;
        if self.state.failed() {
            return Err(BrokerError::Channel("connection has failed".to_string()));
        }

        let (closed, _) = watch::channel(false);
        let channel = Arc::new(ChannelState {
            id: broker.next_id.fetch_add(1, Ordering::SeqCst),
            closed,
            is_closed: AtomicBool::new(false),
        });
        let mut channels = self.state.channels.lock().await;
        channels.retain(|c| !c.is_closed.load(Ordering::SeqCst));
        channels.push(channel.clone());
        drop(channels);

        Ok(Arc::new(MemoryChannel {
            broker: self.state.broker.clone(),
            state: channel,
        }))
    }

    async fn closed(&self) -> BrokerError {
        let mut errors = self.state.errors.subscribe();
        let reason = match errors.wait_for(|e| e.is_some()).await {
            Ok(error) => error.clone().unwrap_or_default(),
            Err(_) => "connection dropped".to_string(),
        };
        BrokerError::Connection(reason)
    }

    async fn close(&self) -> Result<()> {
        let channels: Vec<_> = self.state.channels.lock().await.drain(..).collect();
        if let Some(broker) = self.state.broker.upgrade() {
            for channel in channels {
                channel.shutdown(&broker).await;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Channel
// ============================================================================

struct ChannelState {
    id: u64,
    closed: watch::Sender<bool>,
    is_closed: AtomicBool,
}

impl ChannelState {
    /// Close without counting: ends consumers and deletes owned exclusive queues.
    /// Returns false when the channel was already closed.
    async fn shutdown(&self, broker: &BrokerState) -> bool {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.closed.send_replace(true);

        let mut queues = broker.queues.write().await;
        queues.retain(|name, entry| {
            let owned = entry.owner == Some(self.id);
            if owned {
                debug!(queue = %name, "Deleted exclusive queue");
            }
            !owned
        });
        true
    }
}

/// Channel handed out by [`MemoryConnection`].
pub struct MemoryChannel {
    broker: Weak<BrokerState>,
    state: Arc<ChannelState>,
}

impl MemoryChannel {
    fn broker(&self) -> Result<Arc<BrokerState>> {
        if self.state.is_closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.broker.upgrade().ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, options: &QueueOptions) -> Result<String> {
        let broker = self.broker()?;
        let name = if options.name.is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4().simple())
        } else {
            options.name.clone()
        };

        let mut queues = broker.queues.write().await;
        if !queues.contains_key(&name) {
            let (sender, receiver) = mpsc::unbounded_channel();
            queues.insert(
                name.clone(),
                QueueEntry {
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                    owner: options.exclusive.then_some(self.state.id),
                },
            );
            debug!(queue = %name, exclusive = options.exclusive, "Declared queue");
        }

        Ok(name)
    }

    async fn set_prefetch(&self, _count: u16) -> Result<()> {
        self.broker().map(|_| ())
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<()> {
        let broker = self.broker()?;
        broker.stats.publish_attempts.fetch_add(1, Ordering::SeqCst);

        if take_fault(&broker.publish_failures) {
            return Err(BrokerError::Publish("injected publish failure".to_string()));
        }
        if broker.publish_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let queues = broker.queues.read().await;
        match queues.get(queue) {
            Some(entry) => {
                let _ = entry.sender.send(message);
            }
            None => debug!(queue = %queue, "No such queue, message dropped"),
        }
        broker.stats.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(&self, queue: &str, mode: AckMode) -> Result<DeliveryStream> {
        let broker = self.broker()?;
        let receiver = broker
            .queues
            .read()
            .await
            .get(queue)
            .map(|entry| entry.receiver.clone())
            .ok_or_else(|| BrokerError::Subscribe(format!("no queue '{}'", queue)))?;

        let consumer = Consumer {
            queue: queue.to_string(),
            receiver,
            closed: self.state.closed.subscribe(),
            _channel: self.state.clone(),
            broker: self.broker.clone(),
            mode,
        };

        let stream = futures::stream::unfold(consumer, |mut consumer| async move {
            let message = consumer.next_message().await?;
            let delivery = consumer.delivery(message);
            Some((Ok(delivery), consumer))
        });

        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<()> {
        let broker = self.broker.upgrade().ok_or(BrokerError::NotConnected)?;
        if !self.state.shutdown(&broker).await {
            return Err(BrokerError::Closed);
        }
        broker.stats.channel_closes.fetch_add(1, Ordering::SeqCst);
        info!(channel = self.state.id, "The channel was closed");
        Ok(())
    }
}

// ============================================================================
// Consumers
// ============================================================================

struct Consumer {
    queue: String,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    closed: watch::Receiver<bool>,
    /// Keeps the close signal alive after every channel handle is dropped.
    _channel: Arc<ChannelState>,
    broker: Weak<BrokerState>,
    mode: AckMode,
}

impl Consumer {
    /// Next message, or `None` once the channel closes or the queue is deleted.
    async fn next_message(&mut self) -> Option<Message> {
        let receiver = self.receiver.clone();
        tokio::select! {
            message = async move { receiver.lock().await.recv().await } => message,
            _ = self.closed.wait_for(|closed| *closed) => None,
        }
    }

    fn delivery(&self, message: Message) -> Delivery {
        let acker: Box<dyn Acknowledger> = match self.mode {
            AckMode::Auto => Box::new(NoopAcknowledger),
            AckMode::Manual => Box::new(MemoryAcker {
                queue: self.queue.clone(),
                message: message.clone(),
                broker: self.broker.clone(),
            }),
        };
        Delivery::new(message, acker)
    }
}

struct MemoryAcker {
    queue: String,
    message: Message,
    broker: Weak<BrokerState>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        let broker = self.broker.upgrade().ok_or(BrokerError::NotConnected)?;
        broker.stats.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        let broker = self.broker.upgrade().ok_or(BrokerError::NotConnected)?;
        broker.stats.rejects.fetch_add(1, Ordering::SeqCst);
        if requeue {
            if let Some(entry) = broker.queues.read().await.get(&self.queue) {
                let _ = entry.sender.send(self.message.clone());
            }
        }
        Ok(())
    }
}
