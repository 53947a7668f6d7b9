use futures::{stream::BoxStream, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::outbox::Outbox;
use crate::bus::{EventBus, FLUSH_TOPIC};
use crate::debounce::{DebounceKey, ExpirySource, FlushMessage};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(10),
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    /// Expired key was not a debounce key.
    Ignored,
    Published,
    /// Publishing failed after every retry; the flush waits in the outbox.
    Deferred,
}

/// Bridges the broadcast expiry channel to the durable flush queue.
///
/// Every subscriber of the expiry channel sees every expiry, so exactly one
/// listener may run system-wide. Deployment enforces that; this type only
/// converts and forwards.
///
/// An outbox entry is published by whoever claimed it: the `forward` call that
/// staged it, or one replay. Unclaimed entries are left for the next replay.
pub struct ExpiryListener {
    source: Arc<dyn ExpirySource>,
    bus: Arc<dyn EventBus>,
    outbox: Outbox,
    retry: RetryPolicy,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl ExpiryListener {
    pub fn new(
        source: Arc<dyn ExpirySource>,
        bus: Arc<dyn EventBus>,
        outbox: Outbox,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            bus,
            outbox,
            retry,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Returns false when another task already owns `path`.
    fn claim(&self, path: &Path) -> bool {
        match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.insert(path.to_path_buf()),
            Err(poisoned) => poisoned.into_inner().insert(path.to_path_buf()),
        }
    }

    fn release(&self, path: &Path) {
        match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.remove(path),
            Err(poisoned) => poisoned.into_inner().remove(path),
        };
    }

    pub async fn run(self: Arc<Self>) {
        self.replay_outbox().await;

        let mut backoff = self.retry.initial;
        loop {
            match self.source.subscribe().await {
                Ok(stream) => {
                    backoff = self.retry.initial;
                    let forwarded = self.pump(stream).await;
                    warn!(forwarded, "Expiry subscription closed, resubscribing");
                }
                Err(e) => error!("Failed to subscribe to expiry notifications: {}", e),
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.retry.max);
        }
    }

    /// Forwards expiries until the stream ends. Returns the number of flushes published.
    pub async fn pump(&self, mut expired: BoxStream<'_, String>) -> usize {
        let mut published = 0;
        while let Some(raw_key) = expired.next().await {
            if self.forward(&raw_key).await == Forwarded::Published {
                published += 1;
            }
        }
        published
    }

    pub async fn forward(&self, raw_key: &str) -> Forwarded {
        let Some(key) = DebounceKey::decode(raw_key) else {
            debug!(key = raw_key, "Ignoring unrelated expiry");
            return Forwarded::Ignored;
        };

        let message = FlushMessage::new(key);
        // Claimed before it becomes visible to a replay.
        let staged = match self.outbox.stage_with(&message, |path| {
            self.claim(path);
        })
        .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                error!(alert = "outbox_write_failed", key = %message.debounce_key, "Could not stage flush: {}", e);
                None
            }
        };

        let published = self.publish_with_retry(&message).await;
        if !published {
            error!(
                alert = "flush_publish_failed",
                key = %message.debounce_key,
                staged = staged.is_some(),
                "Flush not enqueued after retries"
            );
        }

        if let Some(path) = staged {
            if published {
                if let Err(e) = self.outbox.clear(&path).await {
                    warn!(path = %path.display(), "Failed to clear outbox entry: {}", e);
                }
            }
            self.release(&path);
        }

        if published {
            Forwarded::Published
        } else {
            Forwarded::Deferred
        }
    }

    /// Republishes flushes left in the outbox by a crash or an exhausted retry.
    pub async fn replay_outbox(&self) -> usize {
        let pending = match self.outbox.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to read outbox: {}", e);
                return 0;
            }
        };

        let mut replayed = 0;
        for (path, message) in pending {
            if !self.claim(&path) {
                debug!(path = %path.display(), "Outbox entry in flight elsewhere, skipping");
                continue;
            }

            // Published and cleared by its owner since `pending` listed it.
            if !self.outbox.contains(&path).await {
                self.release(&path);
                continue;
            }

            let published = self.publish_with_retry(&message).await;
            if published {
                if let Err(e) = self.outbox.clear(&path).await {
                    warn!(path = %path.display(), "Failed to clear outbox entry: {}", e);
                }
                replayed += 1;
            }
            self.release(&path);

            if !published {
                error!(alert = "flush_publish_failed", key = %message.debounce_key, "Outbox replay failed");
                break;
            }
        }

        if replayed > 0 {
            info!(replayed, "Replayed outbox");
        }
        replayed
    }

    async fn publish_with_retry(&self, message: &FlushMessage) -> bool {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(key = %message.debounce_key, "Could not encode flush: {}", e);
                return false;
            }
        };

        let mut delay = self.retry.initial;
        for attempt in 1..=self.retry.max_attempts {
            match self.bus.publish(FLUSH_TOPIC, payload.clone()).await {
                Ok(id) => {
                    info!(key = %message.debounce_key, id = %id, "Flush enqueued");
                    return true;
                }
                Err(e) => {
                    warn!(key = %message.debounce_key, attempt, "Failed to enqueue flush: {}", e);
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(self.retry.max);
                    }
                }
            }
        }

        false
    }
}
