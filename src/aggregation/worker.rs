use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::digest::{build_digests, UserDigest};
use super::dispatch::InAppDispatcher;
use crate::bus::{EventBus, EMAIL_TOPIC};
use crate::debounce::FlushMessage;
use crate::error::{AppError, Result};
use crate::notification::{Channel, EmailDigestEvent, NotificationStore};
use crate::worker::MessageHandler;

/// Turns a flush into per-recipient deliveries on the flushed channel.
///
/// Owns the unsent-to-sent transition. Dispatch happens before the mark, so a
/// crash in between resends on the next flush instead of losing the rows.
pub struct AggregationWorker {
    store: Arc<dyn NotificationStore>,
    in_app: Arc<dyn InAppDispatcher>,
    bus: Arc<dyn EventBus>,
}

impl AggregationWorker {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        in_app: Arc<dyn InAppDispatcher>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self { store, in_app, bus }
    }

    pub async fn handle(&self, message: FlushMessage) -> Result<()> {
        let key = &message.debounce_key;
        let rows = self
            .store
            .select_unsent(key.notification_type, &key.group_on, key.channel)
            .await?;

        if rows.is_empty() {
            debug!(key = %key, "Flush found nothing unsent");
            return Ok(());
        }

        let digests = build_digests(key.notification_type, &key.group_on, rows);
        let mut first_error = None;
        let mut delivered = 0;

        for digest in &digests {
            if let Err(e) = self.dispatch(key.channel, digest).await {
                warn!(key = %key, user = %digest.for_user_id, "Dispatch failed: {}", e);
                first_error.get_or_insert(e);
                continue;
            }

            self.store.mark_sent(&digest.row_ids(), key.channel).await?;
            delivered += digest.count;
        }

        info!(
            key = %key,
            recipients = digests.len(),
            rows = delivered,
            lag_ms = (chrono::Utc::now() - message.fired_at).num_milliseconds(),
            "Flush aggregated"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn dispatch(&self, channel: Channel, digest: &UserDigest) -> Result<()> {
        match channel {
            Channel::InApp => self.in_app.push(digest).await,
            Channel::Email => {
                let event = EmailDigestEvent {
                    for_user_id: digest.for_user_id,
                    notification_type: digest.notification_type,
                    group_on: digest.group_on.clone(),
                    subject: digest.summary.clone(),
                    rows: digest.rows.clone(),
                };
                self.bus
                    .publish(EMAIL_TOPIC, serde_json::to_string(&event)?)
                    .await
                    .map(|_| ())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for AggregationWorker {
    async fn handle_message(&self, payload: &str) -> Result<()> {
        let message: FlushMessage = serde_json::from_str(payload)
            .map_err(|e| AppError::MalformedEvent(format!("undecodable flush message: {}", e)))?;

        self.handle(message).await
    }
}
