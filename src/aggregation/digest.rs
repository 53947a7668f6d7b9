//! Read-time aggregation of unsent rows into per-recipient digests.
//!
//! Everything here is pure so it can be tested without a store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::notification::{NotificationRow, NotificationType};

/// Rows for one recipient, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserDigest {
    pub for_user_id: Uuid,
    pub notification_type: NotificationType,
    pub group_on: String,
    pub count: usize,
    pub summary: String,
    pub rows: Vec<NotificationRow>,
}

impl UserDigest {
    pub fn row_ids(&self) -> Vec<Uuid> {
        self.rows.iter().map(|row| row.id).collect()
    }
}

/// Groups `rows` by recipient (ordered by user id) and orders each group by
/// `created_at`, ties broken by row id, so the same input always formats the same way.
pub fn build_digests(
    notification_type: NotificationType,
    group_on: &str,
    rows: Vec<NotificationRow>,
) -> Vec<UserDigest> {
    let mut by_user: BTreeMap<Uuid, Vec<NotificationRow>> = BTreeMap::new();
    for row in rows {
        by_user.entry(row.for_user_id).or_default().push(row);
    }

    by_user
        .into_iter()
        .map(|(for_user_id, mut rows)| {
            rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            UserDigest {
                for_user_id,
                notification_type,
                group_on: group_on.to_string(),
                count: rows.len(),
                summary: summarize(notification_type, group_on, rows.len()),
                rows,
            }
        })
        .collect()
}

pub fn summarize(notification_type: NotificationType, group_on: &str, count: usize) -> String {
    let (one, many, verb) = match notification_type {
        NotificationType::AssetUploaded => ("asset", "assets", "uploaded to"),
        NotificationType::AssetViewed => ("view", "views", "on"),
        NotificationType::CommentAdded => ("comment", "comments", "on"),
    };
    let noun = if count == 1 { one } else { many };

    format!("{} new {} {} {}", count, noun, verb, group_on)
}
