use crate::{
    aggregation::UserDigest,
    middleware::USER_ID_HEADER,
    notification::{self, Channel, NotificationRow, NotificationType},
    state::AppState,
    websocket,
};
use axum::{
    routing::{get, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        notification::notification_handlers::get_unread_notifications,
        notification::notification_handlers::mark_notification_read,
        websocket::handler::ws_handler,
    ),
    components(
        schemas(
            NotificationRow,
            NotificationType,
            Channel,
            UserDigest,
        )
    ),
    tags(
        (name = "notifications", description = "Notification read endpoints and live digests")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "user_id",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new(USER_ID_HEADER),
                    ),
                ),
            )
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let notification_routes = Router::new()
        .route("/unread", get(notification::get_unread_notifications))
        .route("/:id/read", put(notification::mark_notification_read))
        .route("/ws", get(websocket::ws_handler));

    let api_routes = Router::new().nest("/notification", notification_routes);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
