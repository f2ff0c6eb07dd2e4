//! Bearer token authentication.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// The bearer token, or `anonymous` when the server is open
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ").trim().to_string();
                if token.is_empty() {
                    return Err(AppError::Unauthorized("Empty bearer token".into()));
                }
                if !state.config.accepts_token(&token) {
                    tracing::warn!("Rejected unknown bearer token");
                    return Err(AppError::Unauthorized("Invalid token".into()));
                }
                Ok(AuthUser { token })
            }
            Some(_) => Err(AppError::Unauthorized(
                "Invalid authorization header format".into(),
            )),
            None if state.config.auth_tokens.is_none() => Ok(AuthUser {
                token: "anonymous".to_string(),
            }),
            None => Err(AppError::Unauthorized(
                "Missing authorization header".into(),
            )),
        }
    }
}
