use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::bus::{Delivery, QueueConsumer};
use crate::error::Result;

/// Deliveries seen more often than this are logged as likely poison messages.
const SUSPICIOUS_ATTEMPTS: usize = 5;

/// Handles the raw payload of one queue message. Must be safe to run again
/// for the same payload: anything not acknowledged is redelivered.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle_message(&self, payload: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub name: String,
    pub concurrency: usize,
    /// Processing deadline per message, also the idle time after which an
    /// unacknowledged message is reclaimed.
    pub deadline: Duration,
    pub block: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Dropped,
    Released,
}

pub async fn process_delivery(
    consumer: &dyn QueueConsumer,
    handler: &dyn MessageHandler,
    delivery: &Delivery,
    deadline: Duration,
) -> Outcome {
    if delivery.attempts > SUSPICIOUS_ATTEMPTS {
        warn!(id = %delivery.id, attempts = delivery.attempts, "Message redelivered repeatedly");
    }

    let acknowledge = |outcome: Outcome| async move {
        match consumer.ack(delivery).await {
            Ok(()) => outcome,
            Err(e) => {
                warn!(id = %delivery.id, "Failed to acknowledge message: {}", e);
                Outcome::Released
            }
        }
    };

    match tokio::time::timeout(deadline, handler.handle_message(&delivery.payload)).await {
        Ok(Ok(())) => acknowledge(Outcome::Acked).await,
        Ok(Err(e)) if !e.is_retryable() => {
            warn!(id = %delivery.id, "Dropping message: {}", e);
            acknowledge(Outcome::Dropped).await
        }
        Ok(Err(e)) => {
            error!(id = %delivery.id, attempts = delivery.attempts, "Message failed, left for redelivery: {}", e);
            Outcome::Released
        }
        Err(_) => {
            warn!(id = %delivery.id, deadline_ms = deadline.as_millis() as u64, "Message exceeded processing deadline");
            Outcome::Released
        }
    }
}

/// Pulls from one durable queue and runs up to `concurrency` handlers at once.
pub struct WorkerPool {
    consumer: Arc<dyn QueueConsumer>,
    handler: Arc<dyn MessageHandler>,
    options: PoolOptions,
}

impl WorkerPool {
    pub fn new(
        consumer: Arc<dyn QueueConsumer>,
        handler: Arc<dyn MessageHandler>,
        options: PoolOptions,
    ) -> Self {
        Self {
            consumer,
            handler,
            options,
        }
    }

    /// Fetches the next batch, stale messages first.
    async fn next_batch(&self, room: usize) -> Result<Vec<Delivery>> {
        let reclaimed = self
            .consumer
            .reclaim_stale(self.options.deadline, room)
            .await?;
        if !reclaimed.is_empty() {
            debug!(pool = %self.options.name, count = reclaimed.len(), "Reclaimed stale messages");
            return Ok(reclaimed);
        }

        self.consumer.receive(room, self.options.block).await
    }

    pub async fn run(self) {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        info!(pool = %self.options.name, concurrency = self.options.concurrency, "Worker pool started");

        loop {
            let Ok(first) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let room = semaphore.available_permits() + 1;

            let batch = match self.next_batch(room).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(pool = %self.options.name, "Failed to fetch messages: {}", e);
                    drop(first);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let mut first = Some(first);
            for delivery in batch {
                let permit = match first.take() {
                    Some(permit) => permit,
                    None => match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let consumer = self.consumer.clone();
                let handler = self.handler.clone();
                let deadline = self.options.deadline;
                tokio::spawn(async move {
                    process_delivery(consumer.as_ref(), handler.as_ref(), &delivery, deadline).await;
                    drop(permit);
                });
            }
        }

        warn!(pool = %self.options.name, "Worker pool stopped");
    }
}
