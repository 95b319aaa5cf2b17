use sqlx::FromRow;
use time::OffsetDateTime;

/// Panorama row. `image_url` is `None` once soft-deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Panorama {
    pub id: i64,
    pub user_id: i64,
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
    pub content_hash: String,
    pub created_at: OffsetDateTime,
}

impl Panorama {
    pub fn is_deleted(&self) -> bool {
        self.image_url.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewPanorama {
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub file_name: Option<String>,
    pub image_url: String,
    pub file_size: i64,
    pub file_type: String,
    pub is_public: bool,
    pub tags: Vec<String>,
    pub content_hash: String,
}

/// Result of the atomic quota + dedup + insert.
#[derive(Debug)]
pub enum InsertOutcome {
    Created {
        panorama: Panorama,
        /// Active files the user owned right before this insert.
        count_before: i64,
    },
    QuotaExceeded,
    Duplicate {
        existing_title: String,
    },
}
