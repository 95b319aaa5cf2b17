use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::repo_types::{SubscriptionType, User};

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Identity asserted by an OAuth provider after the client-side flow.
#[derive(Debug, Deserialize)]
pub struct OAuthRequest {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub oauth_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Response returned after register, login or OAuth.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub session_token: String,
    pub user: PublicUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_new_user: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    pub subscription_type: SubscriptionType,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        // Destructured so a new secret column can't slip through unnoticed.
        let User {
            id,
            email,
            name,
            password_hash: _,
            role,
            subscription_type,
            avatar_url,
            created_at,
        } = u;
        Self {
            id: *id,
            email: email.clone(),
            name: name.clone(),
            role: role.clone(),
            subscription_type: *subscription_type,
            avatar_url: avatar_url.clone(),
            created_at: *created_at,
        }
    }
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        PublicUser::from(&u)
    }
}
