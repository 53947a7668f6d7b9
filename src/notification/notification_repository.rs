use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use super::notification_models::{Channel, NewNotification, NotificationRow, NotificationType};

/// Operations the pipeline and the REST layer need from the notification store.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: NewNotification) -> Result<NotificationRow>;

    /// Unread rows for `(notification_type, group_on)` not yet sent on `channel`.
    async fn select_unsent(
        &self,
        notification_type: NotificationType,
        group_on: &str,
        channel: Channel,
    ) -> Result<Vec<NotificationRow>>;

    async fn mark_sent(&self, ids: &[Uuid], channel: Channel) -> Result<u64>;

    /// Groups holding unsent, unread rows created before `older_than`.
    async fn find_stale_groups(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<String>>;

    async fn find_unread_by_user(&self, user_id: Uuid) -> Result<Vec<NotificationRow>>;

    async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<Option<NotificationRow>>;
}

#[derive(Clone)]
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for NotificationRepository {
    async fn insert(&self, notification: NewNotification) -> Result<NotificationRow> {
        let row = sqlx::query_as::<_, NotificationRow>(
            "INSERT INTO notifications
                (notification_type, for_user_id, asset_id, board_id, group_on, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(notification.notification_type)
        .bind(notification.for_user_id)
        .bind(notification.asset_id)
        .bind(notification.board_id)
        .bind(&notification.group_on)
        .bind(notification.occurred_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn select_unsent(
        &self,
        notification_type: NotificationType,
        group_on: &str,
        channel: Channel,
    ) -> Result<Vec<NotificationRow>> {
        let sql = match channel {
            Channel::InApp => {
                "SELECT * FROM notifications
                 WHERE notification_type = $1 AND group_on = $2
                   AND sent_in_app = false AND is_read = false"
            }
            Channel::Email => {
                "SELECT * FROM notifications
                 WHERE notification_type = $1 AND group_on = $2
                   AND sent_email = false AND is_read = false"
            }
        };

        let rows = sqlx::query_as::<_, NotificationRow>(sql)
            .bind(notification_type)
            .bind(group_on)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn mark_sent(&self, ids: &[Uuid], channel: Channel) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = match channel {
            Channel::InApp => "UPDATE notifications SET sent_in_app = true WHERE id = ANY($1)",
            Channel::Email => "UPDATE notifications SET sent_email = true WHERE id = ANY($1)",
        };

        let result = sqlx::query(sql)
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_stale_groups(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let sql = match channel {
            Channel::InApp => {
                "SELECT DISTINCT group_on FROM notifications
                 WHERE notification_type = $1 AND sent_in_app = false
                   AND is_read = false AND created_at < $2"
            }
            Channel::Email => {
                "SELECT DISTINCT group_on FROM notifications
                 WHERE notification_type = $1 AND sent_email = false
                   AND is_read = false AND created_at < $2"
            }
        };

        let groups = sqlx::query_scalar::<_, String>(sql)
            .bind(notification_type)
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?;

        Ok(groups)
    }

    async fn find_unread_by_user(&self, user_id: Uuid) -> Result<Vec<NotificationRow>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            "SELECT * FROM notifications
             WHERE for_user_id = $1 AND is_read = false
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<Option<NotificationRow>> {
        let row = sqlx::query_as::<_, NotificationRow>(
            "UPDATE notifications SET is_read = true
             WHERE id = $1 AND for_user_id = $2
             RETURNING *",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
