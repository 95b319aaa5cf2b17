use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::repo_types::User;
use super::services::resolve_session;
use crate::{error::AppError, state::AppState};

pub const SESSION_HEADER: &str = "x-session-token";

/// Raw `X-Session-Token` value, if any. Header lookup is case-insensitive.
pub struct SessionToken(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionToken {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        Ok(SessionToken(token))
    }
}

/// Resolves the session token into the authenticated user or rejects with 401.
pub struct SessionUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let SessionToken(token) = SessionToken::from_request_parts(parts, state)
            .await
            .unwrap_or(SessionToken(None));
        let user = resolve_session(state, token.as_deref()).await?;
        Ok(SessionUser(user))
    }
}
