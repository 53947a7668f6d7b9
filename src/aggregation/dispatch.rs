use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::debug;

use super::digest::UserDigest;
use crate::error::Result;

/// Pub/sub channel every API replica relays to its live connections.
pub fn in_app_channel(prefix: &str) -> String {
    format!("{}:inapp", prefix)
}

/// Pushes a digest to the recipient's live in-app connection.
#[async_trait]
pub trait InAppDispatcher: Send + Sync {
    async fn push(&self, digest: &UserDigest) -> Result<()>;
}

/// Publishes digests to the in-app channel. Whichever API replica holds the
/// recipient's socket delivers it; offline recipients read the rows over REST.
#[derive(Clone)]
pub struct RedisInAppDispatcher {
    conn: ConnectionManager,
    channel: String,
}

impl RedisInAppDispatcher {
    pub async fn connect(client: &redis::Client, prefix: &str) -> Result<Self> {
        let conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            conn,
            channel: in_app_channel(prefix),
        })
    }
}

#[async_trait]
impl InAppDispatcher for RedisInAppDispatcher {
    async fn push(&self, digest: &UserDigest) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(digest)?;

        let replicas: i64 = conn.publish(&self.channel, payload).await?;
        debug!(user = %digest.for_user_id, replicas, "In-app digest published");

        Ok(())
    }
}
