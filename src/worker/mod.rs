//! Work queue consumer.
//!
//! A worker is one competing consumer on the shared work queue. Each job is
//! acknowledged as soon as it is received; the reply is published after the
//! configured work delay. A crash between the ack and the reply loses the job,
//! and the caller sees a timeout.
//!
//! In-flight jobs are bounded by `max_in_flight`: a permit is taken before the
//! next delivery is pulled and released once the reply has been sent.
//!
//! Replies share one channel per subscription. The channel lock is held for a
//! single publish attempt only, so a reply waiting out its retry delay does not
//! hold up the others.

mod job;

pub use job::{build_reply, parse_job, Job, JobError, STATUS_FIELD, STATUS_SUCCESS};

use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use futures::StreamExt;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use crate::broker::{AckMode, BrokerError, Channel, Delivery, MessageProperties, QueueOptions};
use crate::config::WorkerConfig;
use crate::rpc::{RpcChannel, RpcError, PUBLISH_BACKOFF_STEP};
use crate::supervisor::ConnectionContext;
use crate::utils::cancel::CancellationToken;

/// Errors that end one subscription. The run loop resubscribes after each.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Consumer was cancelled by the broker")]
    ConsumerClosed,
}

/// Reply channel shared by every in-flight job of one subscription.
type ReplyChannel = Arc<Mutex<RpcChannel>>;

/// Consumes jobs from the work queue and answers them.
#[derive(Clone)]
pub struct Worker {
    ctx: ConnectionContext,
    config: Arc<WorkerConfig>,
    in_flight: Arc<Semaphore>,
}

impl Worker {
    pub fn new(ctx: ConnectionContext, config: WorkerConfig) -> Self {
        let permits = config.max_in_flight.max(1);
        Self {
            ctx,
            config: Arc::new(config),
            in_flight: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Consume until `shutdown` is cancelled, resubscribing whenever the
    /// subscription fails.
    pub async fn run(&self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            match self.serve(&shutdown).await {
                Ok(()) => break,
                Err(e) => warn!(
                    error = %e,
                    delay = ?self.config.resubscribe_delay(),
                    "Worker subscription ended, resubscribing"
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.resubscribe_delay()) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        self.drain().await;
        info!("Worker stopped");
    }

    /// One subscription: declare the queue, consume until shutdown or failure.
    async fn serve(&self, shutdown: &CancellationToken) -> Result<(), WorkerError> {
        let connection = self.ctx.connection().await?;
        let channel = connection.create_channel().await?;
        let replies: ReplyChannel = Arc::new(Mutex::new(RpcChannel::create(&self.ctx).await?));

        let result = self.consume(channel.as_ref(), &replies, shutdown).await;

        if let Err(e) = channel.close().await {
            warn!(error = %e, "Error closing consumer channel");
        }
        if result.is_ok() {
            self.drain().await;
            replies.lock().await.close().await;
        }
        result
    }

    async fn consume(
        &self,
        channel: &dyn Channel,
        replies: &ReplyChannel,
        shutdown: &CancellationToken,
    ) -> Result<(), WorkerError> {
        let queue = &self.config.queue;
        channel
            .declare_queue(&QueueOptions::work(queue.as_str(), self.config.durable))
            .await?;
        channel.set_prefetch(self.config.prefetch()).await?;
        let mut deliveries = channel.consume(queue, AckMode::Manual).await?;

        info!(queue = %queue, "Waiting for messages");

        loop {
            let permit = tokio::select! {
                permit = self.in_flight.clone().acquire_owned() => permit,
                _ = shutdown.cancelled() => return Ok(()),
            };
            let Ok(permit) = permit else {
                return Ok(());
            };

            let next = tokio::select! {
                next = deliveries.next() => next,
                _ = shutdown.cancelled() => return Ok(()),
            };
            match next {
                Some(delivery) => self.handle_delivery(delivery?, permit, replies).await,
                None => return Err(WorkerError::ConsumerClosed),
            }
        }
    }

    /// Acknowledge a delivery and, if it is a valid job, schedule its reply.
    pub(crate) async fn handle_delivery(
        &self,
        delivery: Delivery,
        permit: OwnedSemaphorePermit,
        replies: &ReplyChannel,
    ) {
        let job = parse_job(&delivery.message);

        if let Err(e) = delivery.ack().await {
            error!(error = %e, "Failed to acknowledge message");
        }

        let job = match job {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Discarding message");
                return;
            }
        };

        info!(
            correlation_id = %job.correlation_id,
            reply_to = %job.reply_to,
            "Received message"
        );

        let replies = replies.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            tokio::time::sleep(config.work_delay()).await;
            reply(job, &replies, &config).await;
            drop(permit);
        });
    }

    /// Wait for every in-flight reply to finish.
    async fn drain(&self) {
        let total = self.config.max_in_flight.max(1);
        let outstanding = total - self.in_flight.available_permits().min(total);
        if outstanding == 0 {
            return;
        }
        info!(outstanding, "Waiting for in-flight replies");
        let permits = u32::try_from(total).unwrap_or(u32::MAX);
        let _ = self.in_flight.acquire_many(permits).await;
    }
}

async fn reply(job: Job, replies: &ReplyChannel, config: &WorkerConfig) {
    let Job {
        correlation_id,
        reply_to,
        payload,
    } = job;
    let body = build_reply(payload);
    let properties = MessageProperties::default().with_correlation_id(correlation_id.as_str());

    let policy = ConstantBuilder::default()
        .with_delay(config.publish_backoff() + PUBLISH_BACKOFF_STEP)
        .with_max_times(config.publish_retries as usize);

    let queue = reply_to.as_str();
    let body = &body;
    let properties = &properties;
    let result = (move || async move {
        replies
            .lock()
            .await
            .publish(queue, body, properties.clone(), 0, Duration::ZERO)
            .await
    })
    .retry(policy)
    .when(|e: &RpcError| matches!(e, RpcError::Publish { .. }))
    .notify(|err: &RpcError, delay: Duration| {
        warn!(
            correlation_id = %correlation_id,
            queue = %queue,
            error = %err,
            delay = ?delay,
            "Reply publish failed, retrying"
        );
    })
    .await;

    match result {
        Ok(()) => info!(correlation_id = %correlation_id, queue = %reply_to, "Reply sent"),
        Err(e) => error!(
            correlation_id = %correlation_id,
            queue = %reply_to,
            error = %e,
            "Failed to send reply"
        ),
    }
}
