use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use super::AppState;
use crate::domain::UserId;
use crate::error::AppError;

/// The authenticated caller, taken from the JWT `sub` claim.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let value = extract_bearer_header(parts)
            .ok_or_else(|| AppError::Auth("Missing Authorization header".to_string()))?;
        let claims = state.jwt_validator.validate_bearer(value)?;
        Ok(AuthUser(claims.user_id().to_string()))
    }
}

fn extract_bearer_header(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}
