use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error")]
    InternalError,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Whether redelivering the message that produced this error can succeed.
    ///
    /// Store and bus outages are transient. Data-shape failures are not: a
    /// malformed payload stays malformed however often it is delivered.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_) | AppError::Redis(_) | AppError::Bus(_) | AppError::Io(_) => true,
            AppError::InternalError => true,
            AppError::MalformedEvent(_)
            | AppError::Serialization(_)
            | AppError::NotFound(_)
            | AppError::Unauthorized(_)
            | AppError::BadRequest(_) => false,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::MalformedEvent(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Database error occurred")
            }
            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Key-value store error occurred")
            }
            AppError::Bus(ref msg) => {
                tracing::error!("Event bus error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Event bus error occurred")
            }
            AppError::MalformedEvent(ref msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::Serialization(ref e) => {
                tracing::error!("Serialization error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Io(ref e) => {
                tracing::error!("I/O error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::NotFound(ref msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            AppError::Unauthorized(ref msg) => (StatusCode::UNAUTHORIZED, msg.as_str()),
            AppError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
