use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use crate::db::{is_unique_violation, PgStore};
use crate::panoramas::repo_types::{InsertOutcome, NewPanorama, Panorama};

/// Persistence for uploaded panoramas.
#[async_trait]
pub trait PanoramaStore: Send + Sync {
    /// Files still holding a payload; these count against the quota.
    async fn count_active(&self, user_id: i64) -> anyhow::Result<i64>;
    async fn find_by_hash(&self, user_id: i64, content_hash: &str)
        -> anyhow::Result<Option<Panorama>>;
    /// Re-checks quota and duplicates and inserts, all as one atomic step.
    async fn insert_within_quota(
        &self,
        new: NewPanorama,
        limit: i64,
    ) -> anyhow::Result<InsertOutcome>;
    /// Newest first, soft-deleted rows included.
    async fn list_by_user(&self, user_id: i64) -> anyhow::Result<Vec<Panorama>>;
    /// Clears the payload of a live file owned by `user_id`; returns the row as it was.
    async fn soft_delete(&self, user_id: i64, id: i64) -> anyhow::Result<Option<Panorama>>;
}

const PANORAMA_COLUMNS: &str = "id, user_id, title, description, file_name, image_url, \
     file_size, file_type, is_public, is_premium, views_count, likes_count, tags, \
     content_hash, created_at";

async fn count_active_tx(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM panoramas WHERE user_id = $1 AND image_url IS NOT NULL",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .context("count panoramas")?;
    Ok(count)
}

#[async_trait]
impl PanoramaStore for PgStore {
    async fn count_active(&self, user_id: i64) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM panoramas WHERE user_id = $1 AND image_url IS NOT NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("count panoramas")?;
        Ok(count)
    }

    async fn find_by_hash(
        &self,
        user_id: i64,
        content_hash: &str,
    ) -> anyhow::Result<Option<Panorama>> {
        let row = sqlx::query_as::<_, Panorama>(&format!(
            "SELECT {PANORAMA_COLUMNS} FROM panoramas WHERE user_id = $1 AND content_hash = $2"
        ))
        .bind(user_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .context("find panorama by hash")?;
        Ok(row)
    }

    async fn insert_within_quota(
        &self,
        new: NewPanorama,
        limit: i64,
    ) -> anyhow::Result<InsertOutcome> {
        let mut tx = self.pool.begin().await.context("begin tx")?;

        // Serializes concurrent uploads of the same owner.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(new.user_id)
            .fetch_optional(&mut *tx)
            .await
            .context("lock owner row")?;

        let count_before = count_active_tx(&mut tx, new.user_id).await?;
        if count_before >= limit {
            tx.rollback().await.context("rollback tx")?;
            return Ok(InsertOutcome::QuotaExceeded);
        }

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT title FROM panoramas WHERE user_id = $1 AND content_hash = $2",
        )
        .bind(new.user_id)
        .bind(&new.content_hash)
        .fetch_optional(&mut *tx)
        .await
        .context("dedup check")?;
        if let Some((existing_title,)) = existing {
            tx.rollback().await.context("rollback tx")?;
            return Ok(InsertOutcome::Duplicate { existing_title });
        }

        let inserted = sqlx::query_as::<_, Panorama>(&format!(
            r#"
            INSERT INTO panoramas
                (user_id, title, description, file_name, image_url, file_size, file_type,
                 is_public, tags, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {PANORAMA_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.file_name)
        .bind(&new.image_url)
        .bind(new.file_size)
        .bind(&new.file_type)
        .bind(new.is_public)
        .bind(&new.tags)
        .bind(&new.content_hash)
        .fetch_one(&mut *tx)
        .await;

        let panorama = match inserted {
            Ok(p) => p,
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await.context("rollback tx")?;
                return Ok(InsertOutcome::Duplicate {
                    existing_title: new.title,
                });
            }
            Err(e) => return Err(e).context("insert panorama"),
        };
        tx.commit().await.context("commit tx")?;

        Ok(InsertOutcome::Created {
            panorama,
            count_before,
        })
    }

    async fn list_by_user(&self, user_id: i64) -> anyhow::Result<Vec<Panorama>> {
        let rows = sqlx::query_as::<_, Panorama>(&format!(
            r#"
            SELECT {PANORAMA_COLUMNS}
              FROM panoramas
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("list panoramas")?;
        Ok(rows)
    }

    async fn soft_delete(&self, user_id: i64, id: i64) -> anyhow::Result<Option<Panorama>> {
        let mut tx = self.pool.begin().await.context("begin tx")?;
        let before = sqlx::query_as::<_, Panorama>(&format!(
            r#"
            SELECT {PANORAMA_COLUMNS}
              FROM panoramas
             WHERE id = $1 AND user_id = $2 AND image_url IS NOT NULL
               FOR UPDATE
            "#
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("load panorama")?;

        if before.is_some() {
            sqlx::query("UPDATE panoramas SET image_url = NULL WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("clear panorama payload")?;
        }
        tx.commit().await.context("commit tx")?;
        Ok(before)
    }
}
