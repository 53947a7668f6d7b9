use crate::{
    error::{AppError, Result},
    middleware::AuthUser,
    notification::NotificationRow,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

/// Get the authenticated user's unread notifications, newest first
#[utoipa::path(
    get,
    path = "/api/notification/unread",
    responses(
        (status = 200, description = "Unread notifications", body = Vec<NotificationRow>),
        (status = 401, description = "Missing or invalid user identity"),
        (status = 503, description = "Notification store unavailable")
    ),
    tag = "notifications",
    security(("user_id" = []))
)]
pub async fn get_unread_notifications(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<NotificationRow>>> {
    let notifications = state.notification_store.find_unread_by_user(user_id).await?;

    Ok(Json(notifications))
}

/// Mark a notification as read
#[utoipa::path(
    put,
    path = "/api/notification/{id}/read",
    params(
        ("id" = Uuid, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Notification marked as read", body = NotificationRow),
        (status = 401, description = "Missing or invalid user identity"),
        (status = 404, description = "Notification not found")
    ),
    tag = "notifications",
    security(("user_id" = []))
)]
pub async fn mark_notification_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationRow>> {
    let notification = state
        .notification_store
        .mark_as_read(id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))?;

    Ok(Json(notification))
}
