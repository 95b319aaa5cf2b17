use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use super::repo_types::{InsertOutcome, NewPanorama, Panorama};
use crate::auth::repo_types::{SubscriptionType, User};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::object_key;

pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;
pub const FREE_TIER_LIMIT: i64 = 5;
/// Effective ceiling for the "unlimited" paid tiers.
pub const PAID_TIER_LIMIT: i64 = 1000;

pub fn upload_limit(tier: SubscriptionType) -> i64 {
    match tier {
        SubscriptionType::Free => FREE_TIER_LIMIT,
        _ => PAID_TIER_LIMIT,
    }
}

/// Hex SHA-256 of the raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Trimmed, non-empty, first occurrence wins.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

pub struct UploadInput {
    pub title: String,
    pub description: String,
    pub file_name: Option<String>,
    pub file_bytes: Bytes,
    pub file_type: String,
    pub tags: Vec<String>,
    pub is_public: bool,
}

#[derive(Debug)]
pub struct Uploaded {
    pub panorama: Panorama,
    pub remaining_uploads: i64,
}

pub struct Listing {
    pub panoramas: Vec<Panorama>,
    pub total: i64,
    pub limit: i64,
    pub remaining: i64,
}

fn validate(input: &UploadInput) -> AppResult<()> {
    if input.title.trim().is_empty() {
        return Err(AppError::validation("title is required"));
    }
    if input.file_bytes.is_empty() {
        return Err(AppError::validation("file is required"));
    }
    if !input.file_type.starts_with("image/") {
        return Err(AppError::validation("only image files are allowed"));
    }
    if input.file_bytes.len() > MAX_FILE_SIZE {
        return Err(AppError::PayloadTooLarge(format!(
            "file exceeds {} MiB",
            MAX_FILE_SIZE / (1024 * 1024)
        )));
    }
    Ok(())
}

#[instrument(skip(st, user, input), fields(user_id = user.id, size = input.file_bytes.len()))]
pub async fn upload(st: &AppState, user: &User, input: UploadInput) -> AppResult<Uploaded> {
    validate(&input)?;

    let limit = upload_limit(user.subscription_type);
    let hash = content_hash(&input.file_bytes);

    // Cheap early rejection so refused uploads never reach storage.
    if st.panoramas.count_active(user.id).await? >= limit {
        warn!(limit, "upload quota reached");
        return Err(AppError::QuotaExceeded { limit });
    }
    if let Some(existing) = st.panoramas.find_by_hash(user.id, &hash).await? {
        warn!(existing_id = existing.id, "duplicate upload");
        return Err(AppError::Duplicate {
            title: existing.title,
        });
    }

    let key = object_key(user.id, &input.file_type);
    let file_size = input.file_bytes.len() as i64;
    let reference = st
        .storage
        .put_object(&key, input.file_bytes, &input.file_type)
        .await?;

    let new = NewPanorama {
        user_id: user.id,
        title: input.title.trim().to_string(),
        description: input.description.trim().to_string(),
        file_name: input.file_name,
        image_url: reference.clone(),
        file_size,
        file_type: input.file_type,
        is_public: input.is_public,
        tags: normalize_tags(input.tags),
        content_hash: hash,
    };

    let rejected = match st.panoramas.insert_within_quota(new, limit).await {
        Ok(InsertOutcome::Created {
            panorama,
            count_before,
        }) => {
            info!(panorama_id = panorama.id, "panorama uploaded");
            return Ok(Uploaded {
                panorama,
                remaining_uploads: (limit - count_before - 1).max(0),
            });
        }
        Ok(InsertOutcome::QuotaExceeded) => AppError::QuotaExceeded { limit },
        Ok(InsertOutcome::Duplicate { existing_title }) => AppError::Duplicate {
            title: existing_title,
        },
        Err(e) => AppError::Internal(e),
    };

    // Lost a race with a concurrent upload; drop the orphaned payload.
    warn!(error = %rejected, "upload rejected at insert");
    if let Err(e) = st.storage.delete_object(&reference).await {
        warn!(error = %e, key = %key, "failed to remove orphaned payload");
    }
    Err(rejected)
}

#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn list(st: &AppState, user: &User) -> AppResult<Listing> {
    let panoramas = st.panoramas.list_by_user(user.id).await?;
    let limit = upload_limit(user.subscription_type);
    let total = panoramas.iter().filter(|p| !p.is_deleted()).count() as i64;
    Ok(Listing {
        panoramas,
        total,
        limit,
        remaining: (limit - total).max(0),
    })
}

/// Soft delete. Someone else's file and a missing file look the same.
#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn delete(st: &AppState, user: &User, id: i64) -> AppResult<Panorama> {
    let Some(deleted) = st.panoramas.soft_delete(user.id, id).await? else {
        return Err(AppError::NotFound("panorama not found".into()));
    };
    if let Some(reference) = &deleted.image_url {
        if let Err(e) = st.storage.delete_object(reference).await {
            warn!(error = %e, panorama_id = id, "failed to remove payload");
        }
    }
    info!(panorama_id = id, "panorama deleted");
    Ok(deleted)
}
