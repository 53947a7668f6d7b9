//! In-memory stand-ins for the external collaborators, for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::aggregation::{InAppDispatcher, UserDigest};
use crate::bus::{Delivery, EventBus, QueueConsumer};
use crate::debounce::{DebounceKey, DebounceStore, ExpirySource};
use crate::error::{AppError, Result};
use crate::notification::{
    Channel, NewNotification, NotificationEvent, NotificationRow, NotificationStore, NotificationType,
};

pub fn event(kind: NotificationType, user: Uuid, group_on: &str) -> NotificationEvent {
    NotificationEvent {
        notification_type: kind,
        for_user_id: user,
        asset_id: Some(Uuid::new_v4()),
        board_id: None,
        group_on: group_on.to_string(),
        occurred_at: Utc::now(),
    }
}

pub fn new_notification(kind: NotificationType, user: Uuid, group_on: &str) -> NewNotification {
    event(kind, user, group_on).into()
}

pub fn row(kind: NotificationType, user: Uuid, group_on: &str, created_at: DateTime<Utc>) -> NotificationRow {
    NotificationRow {
        id: Uuid::new_v4(),
        notification_type: kind,
        for_user_id: user,
        asset_id: Some(Uuid::new_v4()),
        board_id: None,
        group_on: group_on.to_string(),
        is_read: false,
        sent_in_app: false,
        sent_email: false,
        occurred_at: created_at,
        created_at,
    }
}

fn store_down() -> AppError {
    AppError::Database(sqlx::Error::PoolTimedOut)
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    rows: Mutex<Vec<NotificationRow>>,
    fail_insert: AtomicBool,
    fail_mark_sent: AtomicBool,
}

impl MemoryNotificationStore {
    pub fn rows(&self) -> Vec<NotificationRow> {
        self.rows.lock().unwrap().clone()
    }

    pub fn push_row(&self, row: NotificationRow) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn fail_next_insert(&self) {
        self.fail_insert.store(true, Ordering::SeqCst);
    }

    /// Simulates a crash after dispatch and before the sent flag is written.
    pub fn fail_next_mark_sent(&self) {
        self.fail_mark_sent.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: NewNotification) -> Result<NotificationRow> {
        if self.fail_insert.swap(false, Ordering::SeqCst) {
            return Err(store_down());
        }

        let row = NotificationRow {
            id: Uuid::new_v4(),
            notification_type: notification.notification_type,
            for_user_id: notification.for_user_id,
            asset_id: notification.asset_id,
            board_id: notification.board_id,
            group_on: notification.group_on,
            is_read: false,
            sent_in_app: false,
            sent_email: false,
            occurred_at: notification.occurred_at,
            created_at: Utc::now(),
        };
        self.rows.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn select_unsent(
        &self,
        notification_type: NotificationType,
        group_on: &str,
        channel: Channel,
    ) -> Result<Vec<NotificationRow>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.notification_type == notification_type && r.group_on == group_on)
            .filter(|r| !r.is_read && !r.is_sent(channel))
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, ids: &[Uuid], channel: Channel) -> Result<u64> {
        if self.fail_mark_sent.swap(false, Ordering::SeqCst) {
            return Err(store_down());
        }

        let mut updated = 0;
        for row in self.rows.lock().unwrap().iter_mut().filter(|r| ids.contains(&r.id)) {
            match channel {
                Channel::InApp => row.sent_in_app = true,
                Channel::Email => row.sent_email = true,
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn find_stale_groups(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut groups: Vec<String> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.notification_type == notification_type && r.created_at < older_than)
            .filter(|r| !r.is_read && !r.is_sent(channel))
            .map(|r| r.group_on.clone())
            .collect();
        groups.sort();
        groups.dedup();
        Ok(groups)
    }

    async fn find_unread_by_user(&self, user_id: Uuid) -> Result<Vec<NotificationRow>> {
        let mut rows: Vec<NotificationRow> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.for_user_id == user_id && !r.is_read)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<Option<NotificationRow>> {
        let mut rows = self.rows.lock().unwrap();
        let updated = rows
            .iter_mut()
            .find(|r| r.id == id && r.for_user_id == user_id)
            .map(|r| {
                r.is_read = true;
                r.clone()
            });
        Ok(updated)
    }
}

/// TTL store on a manual clock. Nothing expires until [`advance`](Self::advance).
#[derive(Default)]
pub struct MemoryDebounceStore {
    now: Mutex<Duration>,
    deadlines: Mutex<HashMap<String, Duration>>,
}

impl MemoryDebounceStore {
    pub fn remaining(&self, key: &DebounceKey) -> Option<Duration> {
        let now = *self.now.lock().unwrap();
        self.deadlines
            .lock()
            .unwrap()
            .get(&key.encode())
            .map(|deadline| deadline.saturating_sub(now))
    }

    pub fn armed_count(&self) -> usize {
        self.deadlines.lock().unwrap().len()
    }

    /// Moves the clock forward and returns the keys that expired, in expiry order.
    pub fn advance(&self, by: Duration) -> Vec<String> {
        let now = {
            let mut now = self.now.lock().unwrap();
            *now += by;
            *now
        };

        let mut deadlines = self.deadlines.lock().unwrap();
        let mut expired: Vec<(Duration, String)> = deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        expired.sort();
        for (_, key) in &expired {
            deadlines.remove(key);
        }

        expired.into_iter().map(|(_, key)| key).collect()
    }
}

#[async_trait]
impl DebounceStore for MemoryDebounceStore {
    async fn arm(&self, key: &DebounceKey, window: Duration) -> Result<()> {
        let now = *self.now.lock().unwrap();
        self.deadlines.lock().unwrap().insert(key.encode(), now + window);
        Ok(())
    }

    async fn is_armed(&self, key: &DebounceKey) -> Result<bool> {
        Ok(self.deadlines.lock().unwrap().contains_key(&key.encode()))
    }
}

#[async_trait]
impl ExpirySource for MemoryDebounceStore {
    async fn subscribe(&self) -> Result<BoxStream<'static, String>> {
        Ok(futures::stream::empty().boxed())
    }
}

#[derive(Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<(String, String)>>,
    failures: AtomicUsize,
}

impl MemoryBus {
    pub fn fail_next_publishes(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn published(&self, topic: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn decoded<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published(topic)
            .iter()
            .map(|payload| serde_json::from_str(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<String> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Bus("broker unreachable".to_string()));
        }

        let mut messages = self.messages.lock().unwrap();
        messages.push((topic.to_string(), payload));
        Ok(format!("{}-0", messages.len()))
    }
}

/// Scripted queue: `receive` hands out fresh deliveries, `reclaim_stale`
/// hands out the ones queued as stale.
#[derive(Default)]
pub struct MemoryQueue {
    fresh: Mutex<VecDeque<Delivery>>,
    stale: Mutex<VecDeque<Delivery>>,
    acked: Mutex<Vec<String>>,
}

impl MemoryQueue {
    pub fn push_fresh(&self, delivery: Delivery) {
        self.fresh.lock().unwrap().push_back(delivery);
    }

    /// Queues a delivery as if the broker found it idle past the deadline.
    pub fn push_stale(&self, delivery: Delivery) {
        self.stale.lock().unwrap().push_back(delivery);
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }
}

fn take_up_to(queue: &Mutex<VecDeque<Delivery>>, max: usize) -> Vec<Delivery> {
    let mut queue = queue.lock().unwrap();
    let count = max.min(queue.len());
    queue.drain(..count).collect()
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>> {
        let batch = take_up_to(&self.fresh, max);
        if batch.is_empty() {
            tokio::time::sleep(block).await;
        }
        Ok(batch)
    }

    async fn reclaim_stale(&self, _min_idle: Duration, max: usize) -> Result<Vec<Delivery>> {
        Ok(take_up_to(&self.stale, max))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.acked.lock().unwrap().push(delivery.id.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pushed: Mutex<Vec<UserDigest>>,
    fail_next: AtomicBool,
}

impl RecordingDispatcher {
    pub fn pushed(&self) -> Vec<UserDigest> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn fail_next_push(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InAppDispatcher for RecordingDispatcher {
    async fn push(&self, digest: &UserDigest) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AppError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "publish failed",
            ))));
        }

        self.pushed.lock().unwrap().push(digest.clone());
        Ok(())
    }
}
