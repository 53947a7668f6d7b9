use std::sync::Arc;

use crate::notification::NotificationStore;
use crate::websocket::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub notification_store: Arc<dyn NotificationStore>,
    pub ws_connections: ConnectionManager,
}
