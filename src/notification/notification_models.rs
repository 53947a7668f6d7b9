use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    AssetUploaded,
    AssetViewed,
    CommentAdded,
}

impl NotificationType {
    pub const ALL: [NotificationType; 3] = [
        NotificationType::AssetUploaded,
        NotificationType::AssetViewed,
        NotificationType::CommentAdded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::AssetUploaded => "asset_uploaded",
            NotificationType::AssetViewed => "asset_viewed",
            NotificationType::CommentAdded => "comment_added",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset_uploaded" => Ok(NotificationType::AssetUploaded),
            "asset_viewed" => Ok(NotificationType::AssetViewed),
            "comment_added" => Ok(NotificationType::CommentAdded),
            other => Err(format!("unknown notification type: {}", other)),
        }
    }
}

/// Delivery channel. Each channel debounces and flushes independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Email,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::InApp, Channel::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::InApp => "in_app",
            Channel::Email => "email",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_app" => Ok(Channel::InApp),
            "email" => Ok(Channel::Email),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Event published by producers on the raw topic.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_single_target"))]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub for_user_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub board_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub group_on: String,
    pub occurred_at: DateTime<Utc>,
}

fn validate_single_target(event: &NotificationEvent) -> Result<(), ValidationError> {
    match (event.asset_id, event.board_id) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        (None, None) => Err(ValidationError::new("missing_target")),
        (Some(_), Some(_)) => Err(ValidationError::new("ambiguous_target")),
    }
}

/// Insert payload derived from a validated event.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub for_user_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub board_id: Option<Uuid>,
    pub group_on: String,
    pub occurred_at: DateTime<Utc>,
}

impl From<NotificationEvent> for NewNotification {
    fn from(event: NotificationEvent) -> Self {
        Self {
            notification_type: event.notification_type,
            for_user_id: event.for_user_id,
            asset_id: event.asset_id,
            board_id: event.board_id,
            group_on: event.group_on,
            occurred_at: event.occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct NotificationRow {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub for_user_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub board_id: Option<Uuid>,
    pub group_on: String,
    pub is_read: bool,
    pub sent_in_app: bool,
    pub sent_email: bool,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
impl NotificationRow {
    pub fn is_sent(&self, channel: Channel) -> bool {
        match channel {
            Channel::InApp => self.sent_in_app,
            Channel::Email => self.sent_email,
        }
    }
}

/// Published on the email topic, one per recipient, for the email dispatch worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDigestEvent {
    pub for_user_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub group_on: String,
    pub subject: String,
    pub rows: Vec<NotificationRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(asset_id: Option<Uuid>, board_id: Option<Uuid>, group_on: &str) -> NotificationEvent {
        NotificationEvent {
            notification_type: NotificationType::AssetUploaded,
            for_user_id: Uuid::new_v4(),
            asset_id,
            board_id,
            group_on: group_on.to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_with_single_target_is_valid() {
        assert!(event(Some(Uuid::new_v4()), None, "board42").validate().is_ok());
        assert!(event(None, Some(Uuid::new_v4()), "board42").validate().is_ok());
    }

    #[test]
    fn test_event_without_target_is_rejected() {
        assert!(event(None, None, "board42").validate().is_err());
    }

    #[test]
    fn test_event_with_both_targets_is_rejected() {
        assert!(event(Some(Uuid::new_v4()), Some(Uuid::new_v4()), "board42")
            .validate()
            .is_err());
    }

    #[test]
    fn test_event_with_empty_group_on_is_rejected() {
        assert!(event(Some(Uuid::new_v4()), None, "").validate().is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let raw = r#"{
            "type": "comment_added",
            "for_user_id": "6f1c1a9e-8d0b-4a47-9a3a-0c5d9f6a1b11",
            "asset_id": null,
            "board_id": "0b6f0e7e-2b0e-4c8e-9d8b-3c1f2a4d5e66",
            "group_on": "board42",
            "occurred_at": "2026-01-01T00:00:00Z"
        }"#;
        let event: NotificationEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.notification_type, NotificationType::CommentAdded);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_type_and_channel_names() {
        for kind in NotificationType::ALL {
            assert_eq!(kind.as_str().parse::<NotificationType>().unwrap(), kind);
        }
        for channel in Channel::ALL {
            assert_eq!(channel.to_string().parse::<Channel>().unwrap(), channel);
        }
        assert!("asset_deleted".parse::<NotificationType>().is_err());
    }
}
