use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// POST /upload. `file_data` is base64, optionally with a `data:<mime>;base64,` prefix.
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_data: String,
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PanoramaSummary {
    pub id: i64,
    pub title: String,
    pub image_url: Option<String>,
    pub file_size: i64,
    pub file_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub panorama: PanoramaSummary,
    pub remaining_uploads: i64,
}

#[derive(Debug, Serialize)]
pub struct PanoramaItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub file_name: Option<String>,
    pub image_url: Option<String>,
    pub file_size: i64,
    pub file_type: String,
    pub is_public: bool,
    pub is_premium: bool,
    pub views_count: i64,
    pub likes_count: i64,
    pub tags: Vec<String>,
    pub deleted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct PanoramaListResponse {
    pub panoramas: Vec<PanoramaItem>,
    pub total: i64,
    pub limit: i64,
    pub remaining: i64,
}
