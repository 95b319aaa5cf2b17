use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::auth::repo::AccountStore;
use crate::auth::repo_types::{NewUser, ProfileUpdate, Session, SubscriptionType, User};
use crate::panoramas::repo::PanoramaStore;
use crate::panoramas::repo_types::{InsertOutcome, NewPanorama, Panorama};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    sessions: HashMap<String, Session>,
    panoramas: Vec<Panorama>,
    next_user_id: i64,
    next_panorama_id: i64,
}

/// In-process store behind the same traits as `PgStore`. One lock guards all
/// tables, so every trait method is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes a user's tier; tiers have no API of their own.
    #[cfg(test)]
    pub async fn set_subscription(&self, user_id: i64, tier: SubscriptionType) -> bool {
        let mut t = self.tables.lock().await;
        match t.users.iter_mut().find(|u| u.id == user_id) {
            Some(u) => {
                u.subscription_type = tier;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn create_user(&self, new: NewUser) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.lock().await;
        if t.users.iter().any(|u| u.email.eq_ignore_ascii_case(&new.email)) {
            return Ok(None);
        }
        t.next_user_id += 1;
        let user = User {
            id: t.next_user_id,
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            role: "user".into(),
            subscription_type: SubscriptionType::Free,
            avatar_url: new.avatar_url,
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.push(user.clone());
        Ok(Some(user))
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate,
    ) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.lock().await;
        let Some(user) = t.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            user.name = name.clone();
        }
        if let Some(avatar) = &update.avatar_url {
            user.avatar_url = avatar.clone();
        }
        Ok(Some(user.clone()))
    }

    async fn backfill_avatar(&self, id: i64, avatar_url: &str) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.lock().await;
        let Some(user) = t.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if user.avatar_url.as_deref().map_or(true, str::is_empty) {
            user.avatar_url = Some(avatar_url.to_string());
        }
        Ok(Some(user.clone()))
    }

    async fn create_session(&self, session: &Session) -> anyhow::Result<()> {
        let mut t = self.tables.lock().await;
        anyhow::ensure!(
            !t.sessions.contains_key(&session.token),
            "session token collision"
        );
        t.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token: &str) -> anyhow::Result<Option<Session>> {
        let t = self.tables.lock().await;
        Ok(t.sessions.get(token).cloned())
    }

    async fn expire_session(&self, token: &str, at: OffsetDateTime) -> anyhow::Result<bool> {
        let mut t = self.tables.lock().await;
        match t.sessions.get_mut(token) {
            Some(s) if s.expires_at > at => {
                s.expires_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn count_active(t: &Tables, user_id: i64) -> i64 {
    t.panoramas
        .iter()
        .filter(|p| p.user_id == user_id && !p.is_deleted())
        .count() as i64
}

#[async_trait]
impl PanoramaStore for MemoryStore {
    async fn count_active(&self, user_id: i64) -> anyhow::Result<i64> {
        let t = self.tables.lock().await;
        Ok(count_active(&t, user_id))
    }

    async fn find_by_hash(
        &self,
        user_id: i64,
        content_hash: &str,
    ) -> anyhow::Result<Option<Panorama>> {
        let t = self.tables.lock().await;
        Ok(t.panoramas
            .iter()
            .find(|p| p.user_id == user_id && p.content_hash == content_hash)
            .cloned())
    }

    async fn insert_within_quota(
        &self,
        new: NewPanorama,
        limit: i64,
    ) -> anyhow::Result<InsertOutcome> {
        let mut t = self.tables.lock().await;
        let count_before = count_active(&t, new.user_id);
        if count_before >= limit {
            return Ok(InsertOutcome::QuotaExceeded);
        }
        if let Some(existing) = t
            .panoramas
            .iter()
            .find(|p| p.user_id == new.user_id && p.content_hash == new.content_hash)
        {
            return Ok(InsertOutcome::Duplicate {
                existing_title: existing.title.clone(),
            });
        }

        t.next_panorama_id += 1;
        let panorama = Panorama {
            id: t.next_panorama_id,
            user_id: new.user_id,
            title: new.title,
            description: new.description,
            file_name: new.file_name,
            image_url: Some(new.image_url),
            file_size: new.file_size,
            file_type: new.file_type,
            is_public: new.is_public,
            is_premium: false,
            views_count: 0,
            likes_count: 0,
            tags: new.tags,
            content_hash: new.content_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        t.panoramas.push(panorama.clone());
        Ok(InsertOutcome::Created {
            panorama,
            count_before,
        })
    }

    async fn list_by_user(&self, user_id: i64) -> anyhow::Result<Vec<Panorama>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<Panorama> = t
            .panoramas
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn soft_delete(&self, user_id: i64, id: i64) -> anyhow::Result<Option<Panorama>> {
        let mut t = self.tables.lock().await;
        let Some(p) = t
            .panoramas
            .iter_mut()
            .find(|p| p.id == id && p.user_id == user_id && !p.is_deleted())
        else {
            return Ok(None);
        };
        let before = p.clone();
        p.image_url = None;
        Ok(Some(before))
    }
}
