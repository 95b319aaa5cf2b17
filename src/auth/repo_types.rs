use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Subscription tier; parameterizes the upload quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    #[default]
    Free,
    Pro,
    Premium,
    Business,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::Free => "free",
            SubscriptionType::Pro => "pro",
            SubscriptionType::Premium => "premium",
            SubscriptionType::Business => "business",
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown subscription type {0:?}")]
pub struct UnknownSubscription(pub String);

impl FromStr for SubscriptionType {
    type Err = UnknownSubscription;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionType::Free),
            "pro" => Ok(SubscriptionType::Pro),
            "premium" => Ok(SubscriptionType::Premium),
            "business" => Ok(SubscriptionType::Business),
            other => Err(UnknownSubscription(other.to_string())),
        }
    }
}

impl TryFrom<String> for SubscriptionType {
    type Error = UnknownSubscription;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// User record in the database. Deliberately not `Serialize`: go through `PublicUser`.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String, // lowercased
    pub name: String,
    pub password_hash: String, // argon2 PHC string (salt + hash)
    pub role: String,
    #[sqlx(try_from = "String")]
    pub subscription_type: SubscriptionType,
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub avatar_url: Option<String>,
}

/// Session row. Valid iff `expires_at > now`.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

/// Partial profile change. `avatar_url: Some(None)` clears the avatar.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar_url: Option<Option<String>>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.avatar_url.is_none()
    }
}
