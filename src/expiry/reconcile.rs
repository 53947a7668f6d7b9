use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use super::listener::ExpiryListener;
use crate::bus::{EventBus, FLUSH_TOPIC};
use crate::config::DebounceWindows;
use crate::debounce::{DebounceKey, DebounceStore, FlushMessage};
use crate::error::{AppError, Result};
use crate::notification::{Channel, NotificationStore, NotificationType};

/// Recovers flushes whose expiry notification never reached the listener.
///
/// Keyspace notifications are fire-and-forget: an expiry that fires while no
/// listener is subscribed is gone. Rows unsent for longer than their window
/// plus a grace period, whose debounce key is no longer armed, get a new flush.
pub struct Reconciler {
    store: Arc<dyn NotificationStore>,
    debounce: Arc<dyn DebounceStore>,
    bus: Arc<dyn EventBus>,
    windows: DebounceWindows,
    grace: Duration,
    listener: Option<Arc<ExpiryListener>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        debounce: Arc<dyn DebounceStore>,
        bus: Arc<dyn EventBus>,
        windows: DebounceWindows,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            debounce,
            bus,
            windows,
            grace,
            listener: None,
        }
    }

    /// Also replays the listener's outbox on every sweep.
    pub fn with_listener(mut self, listener: Arc<ExpiryListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Returns the number of flushes requeued.
    pub async fn sweep(&self) -> Result<usize> {
        if let Some(listener) = &self.listener {
            listener.replay_outbox().await;
        }

        let now = Utc::now();
        let mut requeued = 0;

        for kind in NotificationType::ALL {
            for channel in Channel::ALL {
                let overdue = self.windows.window(kind, channel) + self.grace;
                let cutoff = now
                    - chrono::Duration::from_std(overdue).map_err(|_| AppError::InternalError)?;

                for group_on in self.store.find_stale_groups(kind, channel, cutoff).await? {
                    let key = DebounceKey::new(kind, group_on, channel);
                    if self.debounce.is_armed(&key).await? {
                        continue;
                    }

                    warn!(key = %key, "Unsent rows without an armed debounce key, requeueing flush");
                    let payload = serde_json::to_string(&FlushMessage::new(key))?;
                    self.bus.publish(FLUSH_TOPIC, payload).await?;
                    requeued += 1;
                }
            }
        }

        Ok(requeued)
    }
}

pub async fn start_reconciliation(reconciler: Arc<Reconciler>, schedule: &str) -> anyhow::Result<()> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_uuid, _l| {
        let reconciler = reconciler.clone();

        Box::pin(async move {
            match reconciler.sweep().await {
                Ok(0) => {}
                Ok(requeued) => info!(requeued, "Reconciliation requeued flushes"),
                Err(e) => error!("Reconciliation sweep failed: {:?}", e),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Reconciliation scheduled: {}", schedule);
    Ok(())
}
