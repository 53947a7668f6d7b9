use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-Id";

// Identity is asserted by the gateway in front of this service
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or(AppError::Unauthorized("Missing user identity".to_string()))?;

        let user_id = Uuid::parse_str(header.trim())
            .map_err(|_| AppError::Unauthorized("Invalid user identity".to_string()))?;

        Ok(AuthUser(user_id))
    }
}
