use async_trait::async_trait;
use chrono::Utc;
use futures::{future, stream::BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

use super::key::DebounceKey;
use crate::error::Result;

/// TTL side of the key-value expiry store.
#[async_trait]
pub trait DebounceStore: Send + Sync {
    /// Creates `key` with a TTL of `window`, or resets the TTL of an existing key to
    /// the full `window`. Atomic per key.
    async fn arm(&self, key: &DebounceKey, window: Duration) -> Result<()>;

    async fn is_armed(&self, key: &DebounceKey) -> Result<bool>;
}

/// Broadcast side of the key-value expiry store.
///
/// Every subscriber receives every expired key name, including keys this
/// service never armed.
#[async_trait]
pub trait ExpirySource: Send + Sync {
    async fn subscribe(&self) -> Result<BoxStream<'static, String>>;
}

#[derive(Clone)]
pub struct RedisDebounceStore {
    client: redis::Client,
    conn: ConnectionManager,
    configure_keyspace_events: bool,
}

impl RedisDebounceStore {
    pub async fn connect(client: redis::Client, configure_keyspace_events: bool) -> Result<Self> {
        let conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            client,
            conn,
            configure_keyspace_events,
        })
    }

    fn expired_channel(&self) -> String {
        format!("__keyevent@{}__:expired", self.client.get_connection_info().redis.db)
    }

    async fn enable_expiry_notifications(&self) {
        let mut conn = self.conn.clone();
        let result = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async::<_, ()>(&mut conn)
            .await;

        // Managed Redis often forbids CONFIG; the operator must then set it.
        if let Err(e) = result {
            warn!("Could not enable keyspace expiry notifications: {}", e);
        }
    }
}

#[async_trait]
impl DebounceStore for RedisDebounceStore {
    async fn arm(&self, key: &DebounceKey, window: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let ttl_ms = window.as_millis().max(1) as u64;

        redis::cmd("SET")
            .arg(key.encode())
            .arg(Utc::now().to_rfc3339())
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn is_armed(&self, key: &DebounceKey) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(key.encode())
            .query_async(&mut conn)
            .await?;

        Ok(exists)
    }
}

#[async_trait]
impl ExpirySource for RedisDebounceStore {
    async fn subscribe(&self) -> Result<BoxStream<'static, String>> {
        if self.configure_keyspace_events {
            self.enable_expiry_notifications().await;
        }

        let channel = self.expired_channel();
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        info!("Subscribed to {}", channel);

        let keys = pubsub.into_on_message().filter_map(|msg| {
            let key = match msg.get_payload::<String>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("Dropping undecodable expiry notification: {}", e);
                    None
                }
            };
            future::ready(key)
        });

        Ok(keys.boxed())
    }
}
