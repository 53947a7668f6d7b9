pub mod redis_stream;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub use redis_stream::{RedisStreamBus, RedisStreamConsumer};

pub const RAW_TOPIC: &str = "events.notification.raw";
pub const FLUSH_TOPIC: &str = "events.notification.flush";
pub const EMAIL_TOPIC: &str = "events.notification.email";

/// Durable queue names, one consumer group per queue.
pub const COORDINATOR_QUEUE: &str = "debounce-coordinator";
pub const AGGREGATOR_QUEUE: &str = "aggregation-worker";

/// One message pulled from a durable queue, pending until acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: String,
    pub payload: String,
    /// How many times the queue has handed this message out, this delivery included.
    pub attempts: usize,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends `payload` to `topic`; returns the broker-assigned message id.
    async fn publish(&self, topic: &str, payload: String) -> Result<String>;
}

/// Competing-consumer side of one durable queue.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Waits up to `block` for new messages.
    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>>;

    /// Takes over messages another handler left unacknowledged for at least `min_idle`.
    async fn reclaim_stale(&self, min_idle: Duration, max: usize) -> Result<Vec<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;
}
