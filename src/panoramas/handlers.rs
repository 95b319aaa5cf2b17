use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use base64ct::{Base64, Encoding};
use bytes::Bytes;
use tracing::instrument;

use super::dto::{
    DeleteQuery, PanoramaItem, PanoramaListResponse, PanoramaSummary, UploadRequest,
    UploadResponse,
};
use super::repo_types::Panorama;
use super::services::{self, UploadInput, MAX_FILE_SIZE};
use crate::{
    auth::{dto::MessageResponse, extractors::SessionUser, repo_types::User},
    error::{AppError, AppResult},
    extract::JsonBody,
    state::AppState,
};

pub fn panorama_routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload).delete(delete_by_query))
        .route("/upload/my-panoramas", get(list))
        .route("/upload/:id", delete(delete_by_path))
        // base64 inflates by 4/3, plus room for the JSON around it
        .layer(DefaultBodyLimit::max(MAX_FILE_SIZE / 3 * 4 + 1024 * 1024))
}

/// Accepts bare base64 or a full `data:<mime>;base64,<payload>` URL.
fn decode_file_data(raw: &str) -> AppResult<Bytes> {
    let payload = match raw.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => raw,
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Bytes::new());
    }
    Base64::decode_vec(payload)
        .map(Bytes::from)
        .map_err(|_| AppError::validation("file_data is not valid base64"))
}

fn parse_id(raw: &str) -> AppResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::validation("invalid panorama id"))
}

async fn image_url(st: &AppState, p: &Panorama) -> AppResult<Option<String>> {
    match &p.image_url {
        Some(reference) => Ok(Some(st.storage.public_url(reference).await?)),
        None => Ok(None),
    }
}

async fn to_item(st: &AppState, p: Panorama) -> AppResult<PanoramaItem> {
    let image_url = image_url(st, &p).await?;
    Ok(PanoramaItem {
        id: p.id,
        deleted: p.is_deleted(),
        title: p.title,
        description: p.description,
        file_name: p.file_name,
        image_url,
        file_size: p.file_size,
        file_type: p.file_type,
        is_public: p.is_public,
        is_premium: p.is_premium,
        views_count: p.views_count,
        likes_count: p.likes_count,
        tags: p.tags,
        created_at: p.created_at,
    })
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn upload(
    State(state): State<AppState>,
    SessionUser(user): SessionUser,
    JsonBody(body): JsonBody<UploadRequest>,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let file_bytes = decode_file_data(&body.file_data)?;
    let input = UploadInput {
        title: body.title,
        description: body.description,
        file_name: body.file_name,
        file_bytes,
        file_type: body.file_type,
        tags: body.tags,
        is_public: body.is_public.unwrap_or(true),
    };

    let uploaded = services::upload(&state, &user, input).await?;
    let p = uploaded.panorama;
    let image_url = image_url(&state, &p).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "panorama uploaded",
            panorama: PanoramaSummary {
                id: p.id,
                title: p.title,
                image_url,
                file_size: p.file_size,
                file_type: p.file_type,
                created_at: p.created_at,
            },
            remaining_uploads: uploaded.remaining_uploads,
        }),
    ))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn list(
    State(state): State<AppState>,
    SessionUser(user): SessionUser,
) -> AppResult<Json<PanoramaListResponse>> {
    let listing = services::list(&state, &user).await?;
    let mut panoramas = Vec::with_capacity(listing.panoramas.len());
    for p in listing.panoramas {
        panoramas.push(to_item(&state, p).await?);
    }
    Ok(Json(PanoramaListResponse {
        panoramas,
        total: listing.total,
        limit: listing.limit,
        remaining: listing.remaining,
    }))
}

async fn delete_panorama(
    state: &AppState,
    user: &User,
    raw_id: &str,
) -> AppResult<Json<MessageResponse>> {
    let id = parse_id(raw_id)?;
    let deleted = services::delete(state, user, id).await?;
    Ok(Json(MessageResponse {
        message: format!("panorama \"{}\" deleted", deleted.title),
    }))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_by_path(
    State(state): State<AppState>,
    SessionUser(user): SessionUser,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    delete_panorama(&state, &user, &id).await
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_by_query(
    State(state): State<AppState>,
    SessionUser(user): SessionUser,
    Query(q): Query<DeleteQuery>,
) -> AppResult<Json<MessageResponse>> {
    delete_panorama(&state, &user, q.id.as_deref().unwrap_or_default()).await
}
