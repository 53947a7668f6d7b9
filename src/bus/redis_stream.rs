use async_trait::async_trait;
use redis::{
    aio::ConnectionManager,
    streams::{
        StreamClaimReply, StreamId, StreamInfoConsumersReply, StreamPendingCountReply, StreamReadOptions,
        StreamReadReply,
    },
    AsyncCommands,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Delivery, EventBus, QueueConsumer};
use crate::error::{AppError, Result};

const PAYLOAD_FIELD: &str = "payload";

/// Consumers idle this long with nothing pending are removed from their group.
const ABANDONED_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Stream backing a topic. Queues bound to the topic are consumer groups on it.
pub fn stream_key(prefix: &str, topic: &str) -> String {
    format!("{}:{}", prefix, topic)
}

fn entry_payload(entry: &StreamId) -> String {
    entry.get::<String>(PAYLOAD_FIELD).unwrap_or_default()
}

/// A consumer left behind by a previous process: not us, owns no pending
/// entries, and has not read for `ABANDONED_AFTER`.
fn is_abandoned(name: &str, pending: usize, idle_ms: usize, current: &str) -> bool {
    name != current && pending == 0 && idle_ms as u128 >= ABANDONED_AFTER.as_millis()
}

/// Publishing side of the Redis Streams event bus.
#[derive(Clone)]
pub struct RedisStreamBus {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStreamBus {
    pub async fn connect(client: &redis::Client, prefix: impl Into<String>) -> Result<Self> {
        let conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }
}

#[async_trait]
impl EventBus for RedisStreamBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<String> {
        let mut conn = self.conn.clone();
        let stream = stream_key(&self.prefix, topic);

        let id: String = conn
            .xadd(&stream, "*", &[(PAYLOAD_FIELD, payload.as_str())])
            .await
            .map_err(|e| AppError::Bus(format!("Failed to publish to {}: {}", stream, e)))?;

        debug!(stream = %stream, id = %id, "Published message");
        Ok(id)
    }
}

/// One consumer in a consumer group.
///
/// Blocking reads get their own connection so acks and claims issued by
/// in-flight handlers are not queued behind an `XREADGROUP ... BLOCK`.
pub struct RedisStreamConsumer {
    read_conn: ConnectionManager,
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
}

impl RedisStreamConsumer {
    pub async fn connect(
        client: &redis::Client,
        prefix: &str,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Self> {
        let read_conn = ConnectionManager::new(client.clone()).await?;
        let conn = ConnectionManager::new(client.clone()).await?;

        let consumer = Self {
            read_conn,
            conn,
            stream: stream_key(prefix, topic),
            group: group.to_string(),
            consumer: consumer.to_string(),
        };
        consumer.ensure_group().await?;
        if let Err(e) = consumer.prune_abandoned_consumers().await {
            warn!("Failed to prune consumers of {} on {}: {}", consumer.group, consumer.stream, e);
        }

        Ok(consumer)
    }

    /// Deletes consumers of earlier processes. Consumers that still own
    /// pending entries are kept so their messages can be reclaimed.
    async fn prune_abandoned_consumers(&self) -> redis::RedisResult<usize> {
        let mut conn = self.conn.clone();
        let info: StreamInfoConsumersReply = conn.xinfo_consumers(&self.stream, &self.group).await?;

        let mut pruned = 0;
        for consumer in info.consumers {
            if !is_abandoned(&consumer.name, consumer.pending, consumer.idle, &self.consumer) {
                continue;
            }
            redis::cmd("XGROUP")
                .arg("DELCONSUMER")
                .arg(&self.stream)
                .arg(&self.group)
                .arg(&consumer.name)
                .query_async::<_, i64>(&mut conn)
                .await?;
            pruned += 1;
        }

        if pruned > 0 {
            info!(pruned, "Removed abandoned consumers of {} on {}", self.group, self.stream);
        }
        Ok(pruned)
    }

    /// Binds the durable queue to the topic. Starts from the beginning of the
    /// stream so events published before the first consumer started are kept.
    async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;

        match created {
            Ok(()) => {
                info!("Created consumer group {} on {}", self.group, self.stream);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(AppError::Bus(format!(
                "Failed to create consumer group {} on {}: {}",
                self.group, self.stream, e
            ))),
        }
    }
}

#[async_trait]
impl QueueConsumer for RedisStreamConsumer {
    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>> {
        let mut conn = self.read_conn.clone();
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max)
            .block(block.as_millis() as usize);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[self.stream.as_str()], &[">"], &options)
            .await
            .map_err(|e| AppError::Bus(format!("Failed to read from {}: {}", self.stream, e)))?;

        let deliveries = reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(|entry| Delivery {
                        payload: entry_payload(&entry),
                        id: entry.id,
                        attempts: 1,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(deliveries)
    }

    async fn reclaim_stale(&self, min_idle: Duration, max: usize) -> Result<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let idle_ms = min_idle.as_millis() as usize;

        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream, &self.group, "-", "+", max)
            .await
            .map_err(|e| AppError::Bus(format!("Failed to list pending on {}: {}", self.stream, e)))?;

        let stale: HashMap<String, usize> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= idle_ms)
            .map(|p| (p.id, p.times_delivered))
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = stale.keys().map(String::as_str).collect();
        let claimed: StreamClaimReply = conn
            .xclaim(&self.stream, &self.group, &self.consumer, idle_ms, &ids)
            .await
            .map_err(|e| AppError::Bus(format!("Failed to claim on {}: {}", self.stream, e)))?;

        let deliveries = claimed
            .ids
            .into_iter()
            .map(|entry| Delivery {
                payload: entry_payload(&entry),
                attempts: stale.get(&entry.id).copied().unwrap_or(0) + 1,
                id: entry.id,
            })
            .collect();

        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream, &self.group, &[delivery.id.as_str()])
            .await
            .map_err(|e| AppError::Bus(format!("Failed to ack {} on {}: {}", delivery.id, self.stream, e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_idle_consumers_without_pending_are_abandoned() {
        let day_ms = ABANDONED_AFTER.as_millis() as usize;

        assert!(is_abandoned("old-worker", 0, day_ms, "worker-1"));
        assert!(!is_abandoned("old-worker", 2, day_ms * 3, "worker-1"));
        assert!(!is_abandoned("old-worker", 0, 60_000, "worker-1"));
        assert!(!is_abandoned("worker-1", 0, day_ms * 3, "worker-1"));
    }

    #[test]
    fn test_stream_key_is_prefixed_topic() {
        assert_eq!(stream_key("notify", crate::bus::FLUSH_TOPIC), "notify:events.notification.flush");
    }
}
