use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

use super::key::DebounceKey;
use super::store::DebounceStore;
use crate::config::DebounceWindows;
use crate::error::{AppError, Result};
use crate::notification::{Channel, NotificationEvent, NotificationStore};
use crate::worker::MessageHandler;

/// Persists every raw event and arms or refreshes one debounce key per channel.
pub struct DebounceCoordinator {
    store: Arc<dyn NotificationStore>,
    debounce: Arc<dyn DebounceStore>,
    windows: DebounceWindows,
}

impl DebounceCoordinator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        debounce: Arc<dyn DebounceStore>,
        windows: DebounceWindows,
    ) -> Self {
        Self {
            store,
            debounce,
            windows,
        }
    }

    pub async fn handle(&self, event: NotificationEvent) -> Result<()> {
        event.validate()?;

        // One row per event, even when the event ends up in a digest.
        let row = self.store.insert(event.into()).await?;

        for channel in Channel::ALL {
            let key = DebounceKey::new(row.notification_type, row.group_on.clone(), channel);
            let window = self.windows.window(row.notification_type, channel);
            self.debounce.arm(&key, window).await?;
            debug!(key = %key, window_secs = window.as_secs(), row = %row.id, "Debounce window armed");
        }

        Ok(())
    }
}

#[async_trait]
impl MessageHandler for DebounceCoordinator {
    async fn handle_message(&self, payload: &str) -> Result<()> {
        let event: NotificationEvent = serde_json::from_str(payload)
            .map_err(|e| AppError::MalformedEvent(format!("undecodable notification event: {}", e)))?;

        self.handle(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationType;
    use crate::testing::{event, MemoryDebounceStore, MemoryNotificationStore};
    use std::time::Duration;
    use uuid::Uuid;

    fn coordinator(
        store: &Arc<MemoryNotificationStore>,
        debounce: &Arc<MemoryDebounceStore>,
    ) -> DebounceCoordinator {
        DebounceCoordinator::new(
            store.clone(),
            debounce.clone(),
            DebounceWindows::uniform(Duration::from_secs(10), Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn test_event_is_persisted_and_both_channels_armed() {
        let store = Arc::new(MemoryNotificationStore::default());
        let debounce = Arc::new(MemoryDebounceStore::default());
        let user = Uuid::new_v4();

        coordinator(&store, &debounce)
            .handle(event(NotificationType::AssetUploaded, user, "board42"))
            .await
            .unwrap();

        assert_eq!(store.rows().len(), 1);
        let in_app = DebounceKey::new(NotificationType::AssetUploaded, "board42", Channel::InApp);
        let email = DebounceKey::new(NotificationType::AssetUploaded, "board42", Channel::Email);
        assert_eq!(debounce.remaining(&in_app), Some(Duration::from_secs(10)));
        assert_eq!(debounce.remaining(&email), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_malformed_event_is_rejected_before_any_write() {
        let store = Arc::new(MemoryNotificationStore::default());
        let debounce = Arc::new(MemoryDebounceStore::default());
        let mut bad = event(NotificationType::AssetUploaded, Uuid::new_v4(), "board42");
        bad.asset_id = None;
        bad.board_id = None;

        let err = coordinator(&store, &debounce).handle(bad).await.unwrap_err();

        assert!(matches!(err, AppError::MalformedEvent(_)));
        assert!(!err.is_retryable());
        assert!(store.rows().is_empty());
        assert_eq!(debounce.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_malformed() {
        let store = Arc::new(MemoryNotificationStore::default());
        let debounce = Arc::new(MemoryDebounceStore::default());

        let err = coordinator(&store, &debounce)
            .handle_message("{\"type\":\"asset_uploaded\"")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::MalformedEvent(_)));
    }

    #[tokio::test]
    async fn test_burst_refreshes_window_and_flushes_once_after_last_event() {
        let store = Arc::new(MemoryNotificationStore::default());
        let debounce = Arc::new(MemoryDebounceStore::default());
        let coordinator = coordinator(&store, &debounce);
        let user = Uuid::new_v4();
        let in_app = DebounceKey::new(NotificationType::AssetUploaded, "board42", Channel::InApp);

        // t=0
        coordinator
            .handle(event(NotificationType::AssetUploaded, user, "board42"))
            .await
            .unwrap();
        assert!(debounce.advance(Duration::from_secs(5)).is_empty());

        // t=5
        coordinator
            .handle(event(NotificationType::AssetUploaded, user, "board42"))
            .await
            .unwrap();

        // t=10: the first arm would have fired here without the refresh.
        assert!(debounce.advance(Duration::from_secs(5)).is_empty());

        // t=15
        let expired = debounce.advance(Duration::from_secs(5));
        assert_eq!(expired, vec![in_app.encode()]);

        assert!(debounce.advance(Duration::from_secs(100)).iter().all(|k| k != &in_app.encode()));
        assert_eq!(store.rows().len(), 2);
    }

    #[tokio::test]
    async fn test_every_event_keeps_its_own_row() {
        let store = Arc::new(MemoryNotificationStore::default());
        let debounce = Arc::new(MemoryDebounceStore::default());
        let coordinator = coordinator(&store, &debounce);
        let user = Uuid::new_v4();

        for _ in 0..7 {
            coordinator
                .handle(event(NotificationType::CommentAdded, user, "asset9"))
                .await
                .unwrap();
        }

        assert_eq!(store.rows().len(), 7);
        assert_eq!(debounce.armed_count(), 2);
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let store = Arc::new(MemoryNotificationStore::default());
        let debounce = Arc::new(MemoryDebounceStore::default());
        store.fail_next_insert();

        let err = coordinator(&store, &debounce)
            .handle(event(NotificationType::AssetViewed, Uuid::new_v4(), "asset1"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(debounce.armed_count(), 0);
    }
}
