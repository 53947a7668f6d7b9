// Declare submodules
pub mod notification_handlers;
pub mod notification_models;
pub mod notification_repository;

// Re-export public items
pub use notification_handlers::{get_unread_notifications, mark_notification_read};
pub use notification_models::{
    Channel, EmailDigestEvent, NewNotification, NotificationEvent, NotificationRow, NotificationType,
};
pub use notification_repository::{NotificationRepository, NotificationStore};
