use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::WsMessage;

pub type WsSender = mpsc::UnboundedSender<WsMessage>;

/// Live sockets on this replica, several per user (one per open client).
#[derive(Clone)]
pub struct ConnectionManager {
    connections: Arc<DashMap<Uuid, HashMap<Uuid, WsSender>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Registers a socket and returns its connection id.
    pub fn add_connection(&self, user_id: Uuid, sender: WsSender) -> Uuid {
        let connection_id = Uuid::new_v4();
        self.connections
            .entry(user_id)
            .or_default()
            .insert(connection_id, sender);
        tracing::info!("User {} connected via WebSocket ({})", user_id, connection_id);
        connection_id
    }

    pub fn remove_connection(&self, user_id: &Uuid, connection_id: &Uuid) {
        self.connections.remove_if_mut(user_id, |_, sockets| {
            sockets.remove(connection_id);
            sockets.is_empty()
        });
        tracing::info!("User {} disconnected from WebSocket ({})", user_id, connection_id);
    }

    /// Sends to every socket of `user_id`; returns how many accepted the message.
    /// Sockets whose receiving task is gone are dropped.
    pub fn send_to_user(&self, user_id: &Uuid, message: WsMessage) -> usize {
        let Some(mut sockets) = self.connections.get_mut(user_id) else {
            return 0;
        };

        sockets.retain(|_, sender| sender.send(message.clone()).is_ok());
        let delivered = sockets.len();
        drop(sockets);

        if delivered == 0 {
            self.connections.remove_if(user_id, |_, sockets| sockets.is_empty());
        }
        delivered
    }

    pub fn is_user_online(&self, user_id: &Uuid) -> bool {
        self.connections.contains_key(user_id)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
