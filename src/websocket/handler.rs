use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    middleware::AuthUser,
    state::AppState,
    websocket::types::{ClientMessage, ErrorPayload, NotificationReadPayload, WsMessage},
};

/// WebSocket upgrade handler for live in-app digests
#[utoipa::path(
    get,
    path = "/api/notification/ws",
    responses(
        (status = 101, description = "Switching to WebSocket; server pushes WsMessage frames"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "notifications",
    security(("user_id" = []))
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: Uuid, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();

    let connection_id = state.ws_connections.add_connection(user_id, tx.clone());

    let mut send_task = tokio::spawn(async move {
        let mut outgoing = UnboundedReceiverStream::new(rx);
        while let Some(msg) = outgoing.next().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let state_clone = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = match process_client_message(&text, user_id, &state_clone).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            tracing::warn!("Error processing client message: {:?}", e);
                            WsMessage::Error(ErrorPayload {
                                message: e.to_string(),
                            })
                        }
                    };
                    let _ = tx.send(reply);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.ws_connections.remove_connection(&user_id, &connection_id);
    tracing::info!("WebSocket connection closed for user {}", user_id);
}

/// Marks a row read over the live connection; same ownership rule as the REST endpoint.
async fn process_client_message(text: &str, user_id: Uuid, state: &AppState) -> Result<WsMessage> {
    let client_msg: ClientMessage = serde_json::from_str(text)
        .map_err(|e| AppError::BadRequest(format!("Invalid message format: {}", e)))?;

    match client_msg {
        ClientMessage::MarkRead { notification_id } => {
            state
                .notification_store
                .mark_as_read(notification_id, user_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))?;

            Ok(WsMessage::NotificationRead(NotificationReadPayload { notification_id }))
        }
    }
}
