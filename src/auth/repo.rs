use anyhow::Context;
use async_trait::async_trait;
use time::OffsetDateTime;

use crate::auth::repo_types::{NewUser, ProfileUpdate, Session, User};
use crate::db::{is_unique_violation, PgStore};

/// Persistence for users and their sessions.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_user_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;
    /// Returns `None` when the email is already taken.
    async fn create_user(&self, new: NewUser) -> anyhow::Result<Option<User>>;
    async fn update_profile(&self, id: i64, update: &ProfileUpdate)
        -> anyhow::Result<Option<User>>;
    /// Sets the avatar only when the user has none.
    async fn backfill_avatar(&self, id: i64, avatar_url: &str) -> anyhow::Result<Option<User>>;

    async fn create_session(&self, session: &Session) -> anyhow::Result<()>;
    async fn find_session(&self, token: &str) -> anyhow::Result<Option<Session>>;
    /// Forces `expires_at = at` on a session still valid at `at`. No-op otherwise.
    async fn expire_session(&self, token: &str, at: OffsetDateTime) -> anyhow::Result<bool>;
}

const USER_COLUMNS: &str =
    "id, email, name, password_hash, role, subscription_type, avatar_url, created_at";

#[async_trait]
impl AccountStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_user_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create_user(&self, new: NewUser) -> anyhow::Result<Option<User>> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, name, password_hash, avatar_url)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(&new.avatar_url)
        .fetch_one(&self.pool)
        .await;

        match res {
            Ok(user) => Ok(Some(user)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e).context("insert user"),
        }
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   avatar_url = CASE WHEN $3 THEN $4 ELSE avatar_url END
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.name)
        .bind(update.avatar_url.is_some())
        .bind(update.avatar_url.clone().flatten())
        .fetch_optional(&self.pool)
        .await
        .context("update profile")?;
        Ok(user)
    }

    async fn backfill_avatar(&self, id: i64, avatar_url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET avatar_url = COALESCE(NULLIF(avatar_url, ''), $2)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(avatar_url)
        .fetch_optional(&self.pool)
        .await
        .context("backfill avatar")?;
        Ok(user)
    }

    async fn create_session(&self, session: &Session) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .context("insert session")?;
        Ok(())
    }

    async fn find_session(&self, token: &str) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT token, user_id, created_at, expires_at
              FROM sessions
             WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("find session")?;
        Ok(session)
    }

    async fn expire_session(&self, token: &str, at: OffsetDateTime) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE sessions SET expires_at = $2 WHERE token = $1 AND expires_at > $2")
            .bind(token)
            .bind(at)
            .execute(&self.pool)
            .await
            .context("expire session")?;
        Ok(res.rows_affected() > 0)
    }
}
