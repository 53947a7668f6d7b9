use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::connection::ConnectionManager;
use super::types::WsMessage;
use crate::aggregation::{in_app_channel, UserDigest};

const RECONNECT_INITIAL: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Forwards in-app digests published by aggregation workers to the sockets
/// held by this replica. Digests for users connected elsewhere are skipped.
pub async fn run_in_app_relay(client: redis::Client, prefix: String, connections: ConnectionManager) {
    let channel = in_app_channel(&prefix);
    let mut backoff = RECONNECT_INITIAL;

    loop {
        match subscribe(&client, &channel).await {
            Ok(mut pubsub) => {
                info!("Relaying in-app digests from {}", channel);
                backoff = RECONNECT_INITIAL;

                let mut messages = pubsub.on_message();
                while let Some(msg) = messages.next().await {
                    match msg.get_payload::<String>() {
                        Ok(payload) => {
                            relay_payload(&connections, &payload);
                        }
                        Err(e) => warn!("Dropping undecodable in-app payload: {}", e),
                    }
                }
                warn!("In-app subscription closed, reconnecting");
            }
            Err(e) => error!("Failed to subscribe to {}: {}", channel, e),
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RECONNECT_MAX);
    }
}

async fn subscribe(client: &redis::Client, channel: &str) -> redis::RedisResult<redis::aio::PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Returns the number of local sockets the digest reached.
pub fn relay_payload(connections: &ConnectionManager, payload: &str) -> usize {
    let digest: UserDigest = match serde_json::from_str(payload) {
        Ok(digest) => digest,
        Err(e) => {
            warn!("Dropping malformed in-app digest: {}", e);
            return 0;
        }
    };

    let user_id = digest.for_user_id;
    if !connections.is_user_online(&user_id) {
        return 0;
    }

    let delivered = connections.send_to_user(&user_id, WsMessage::Digest(digest));
    if delivered > 0 {
        debug!(user = %user_id, delivered, "In-app digest delivered");
    }
    delivered
}
