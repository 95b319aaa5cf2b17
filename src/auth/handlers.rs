use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, MessageResponse, OAuthRequest, ProfileResponse,
            RegisterRequest, UpdateProfileRequest,
        },
        extractors::SessionToken,
        services,
    },
    error::AppResult,
    extract::JsonBody,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/oauth", post(oauth))
        .route("/auth/logout", post(logout))
        .route("/auth/profile", get(get_profile).put(update_profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let (user, session_token) = services::register(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "user registered",
            session_token,
            user,
            is_new_user: None,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let (user, session_token) = services::login(&state, payload).await?;
    Ok(Json(AuthResponse {
        message: "logged in",
        session_token,
        user,
        is_new_user: None,
    }))
}

#[instrument(skip(state, payload))]
pub async fn oauth(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<OAuthRequest>,
) -> AppResult<Json<AuthResponse>> {
    let (user, session_token, is_new_user) = services::oauth(&state, payload).await?;
    Ok(Json(AuthResponse {
        message: "oauth sign-in successful",
        session_token,
        user,
        is_new_user: Some(is_new_user),
    }))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> AppResult<Json<MessageResponse>> {
    services::logout(&state, token.as_deref()).await?;
    Ok(Json(MessageResponse {
        message: "logged out".into(),
    }))
}

#[instrument(skip_all)]
pub async fn get_profile(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> AppResult<Json<ProfileResponse>> {
    let user = services::get_profile(&state, token.as_deref()).await?;
    Ok(Json(ProfileResponse {
        message: None,
        user,
    }))
}

#[instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    let user = services::update_profile(&state, token.as_deref(), payload).await?;
    Ok(Json(ProfileResponse {
        message: Some("profile updated"),
        user,
    }))
}
