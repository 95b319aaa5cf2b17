use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::auth::dto::{LoginRequest, OAuthRequest, PublicUser, RegisterRequest, UpdateProfileRequest};
use crate::auth::password::{hash_password, unusable_password_hash, verify_dummy, verify_password};
use crate::auth::repo_types::{NewUser, ProfileUpdate, Session, User};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "invalid email or password";
const MIN_PASSWORD_LEN: usize = 6;
const MIN_NAME_LEN: usize = 2;
const TOKEN_BYTES: usize = 32;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_name(name: &str) -> AppResult<()> {
    if name.chars().count() < MIN_NAME_LEN {
        return Err(AppError::validation(format!(
            "name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn default_avatar(email: &str) -> String {
    format!("https://api.dicebear.com/7.x/avataaars/svg?seed={email}")
}

/// 32 random bytes from the OS, base64url without padding.
pub(crate) fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    Base64UrlUnpadded::encode_string(&buf)
}

fn token_prefix(token: &str) -> &str {
    token.get(..6).unwrap_or(token)
}

/// Argon2 is CPU-bound; keep it off the async workers.
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("password hashing task")?
}

async fn issue_session(st: &AppState, user_id: i64) -> AppResult<String> {
    let now = st.clock.now();
    let session = Session {
        token: generate_token(),
        user_id,
        created_at: now,
        expires_at: now + st.config.session_ttl(),
    };
    st.accounts.create_session(&session).await?;
    debug!(user_id, token = token_prefix(&session.token), "session issued");
    Ok(session.token)
}

#[instrument(skip(st, req), fields(email = %req.email.trim()))]
pub async fn register(st: &AppState, req: RegisterRequest) -> AppResult<(PublicUser, String)> {
    let email = normalize_email(&req.email);
    let name = req.name.trim().to_string();

    if !is_valid_email(&email) {
        return Err(AppError::validation("invalid email"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    validate_name(&name)?;

    if st.accounts.find_user_by_email(&email).await?.is_some() {
        warn!("email already registered");
        return Err(AppError::Conflict("email already registered".into()));
    }

    let password = req.password;
    let password_hash = blocking(move || hash_password(&password)).await?;

    let new = NewUser {
        avatar_url: Some(default_avatar(&email)),
        email,
        name,
        password_hash,
    };
    let user = st
        .accounts
        .create_user(new)
        .await?
        .ok_or_else(|| AppError::Conflict("email already registered".into()))?;

    let token = issue_session(st, user.id).await?;
    info!(user_id = user.id, "user registered");
    Ok((PublicUser::from(user), token))
}

#[instrument(skip(st, req))]
pub async fn login(st: &AppState, req: LoginRequest) -> AppResult<(PublicUser, String)> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(AppError::validation("email and password are required"));
    }

    let user = st.accounts.find_user_by_email(&email).await?;
    let password = req.password;
    let (user, ok) = blocking(move || match user {
        Some(u) => {
            let ok = verify_password(&password, &u.password_hash)?;
            Ok((Some(u), ok))
        }
        None => {
            verify_dummy(&password);
            Ok((None, false))
        }
    })
    .await?;

    let user = match (user, ok) {
        (Some(u), true) => u,
        (user, _) => {
            warn!(user_id = user.map(|u| u.id), "login rejected");
            return Err(AppError::unauthorized(INVALID_CREDENTIALS));
        }
    };

    let token = issue_session(st, user.id).await?;
    info!(user_id = user.id, "user logged in");
    Ok((PublicUser::from(user), token))
}

/// Returns the user, a fresh session token, and whether the account was just created.
#[instrument(skip(st, req), fields(provider = %req.provider))]
pub async fn oauth(st: &AppState, req: OAuthRequest) -> AppResult<(PublicUser, String, bool)> {
    let provider = req.provider.trim().to_lowercase();
    let email = normalize_email(&req.email);
    let name = req.name.trim().to_string();
    let avatar = req
        .avatar_url
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    if provider.is_empty() || email.is_empty() || name.is_empty() {
        return Err(AppError::validation("provider, email and name are required"));
    }

    let (user, is_new_user) = match st.accounts.find_user_by_email(&email).await? {
        Some(existing) => {
            let user = match &avatar {
                Some(a) if existing.avatar_url.as_deref().map_or(true, str::is_empty) => st
                    .accounts
                    .backfill_avatar(existing.id, a)
                    .await?
                    .unwrap_or(existing),
                _ => existing,
            };
            (user, false)
        }
        None => {
            let password_hash = blocking(unusable_password_hash).await?;
            let new = NewUser {
                avatar_url: Some(avatar.unwrap_or_else(|| default_avatar(&email))),
                email: email.clone(),
                name,
                password_hash,
            };
            match st.accounts.create_user(new).await? {
                Some(u) => (u, true),
                // Lost a race with a concurrent sign-up for the same email.
                None => {
                    let u = st
                        .accounts
                        .find_user_by_email(&email)
                        .await?
                        .context("user vanished after email conflict")?;
                    (u, false)
                }
            }
        }
    };

    let token = issue_session(st, user.id).await?;
    info!(user_id = user.id, oauth_id = %req.oauth_id, is_new_user, "oauth sign-in");
    Ok((PublicUser::from(user), token, is_new_user))
}

/// Idempotent: unknown, missing or already-expired tokens are fine.
#[instrument(skip_all)]
pub async fn logout(st: &AppState, token: Option<&str>) -> AppResult<()> {
    let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let expired = st.accounts.expire_session(token, st.clock.now()).await?;
    debug!(token = token_prefix(token), expired, "logout");
    Ok(())
}

/// The authorization gate: token + current time + store state → user.
#[instrument(skip_all)]
pub async fn resolve_session(st: &AppState, token: Option<&str>) -> AppResult<User> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("authorization required"))?;

    let session = st
        .accounts
        .find_session(token)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid session"))?;

    if !session.is_valid_at(st.clock.now()) {
        debug!(token = token_prefix(token), "session expired");
        return Err(AppError::unauthorized("session expired"));
    }

    st.accounts
        .find_user_by_id(session.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("user not found"))
}

pub async fn get_profile(st: &AppState, token: Option<&str>) -> AppResult<PublicUser> {
    resolve_session(st, token).await.map(PublicUser::from)
}

#[instrument(skip(st, token, req))]
pub async fn update_profile(
    st: &AppState,
    token: Option<&str>,
    req: UpdateProfileRequest,
) -> AppResult<PublicUser> {
    let user = resolve_session(st, token).await?;

    let mut update = ProfileUpdate::default();
    if let Some(name) = req.name {
        let name = name.trim();
        validate_name(name)?;
        update.name = Some(name.to_string());
    }
    if let Some(avatar) = req.avatar_url {
        let avatar = avatar.trim();
        update.avatar_url = Some((!avatar.is_empty()).then(|| avatar.to_string()));
    }
    if update.is_empty() {
        return Err(AppError::validation("nothing to update"));
    }

    let updated = st
        .accounts
        .update_profile(user.id, &update)
        .await?
        .ok_or_else(|| AppError::unauthorized("user not found"))?;
    info!(user_id = updated.id, "profile updated");
    Ok(PublicUser::from(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::AccountStore;
    use time::Duration;

    fn register_req(email: &str, password: &str, name: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            name: name.into(),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    fn oauth_req(email: &str, avatar: Option<&str>) -> OAuthRequest {
        OAuthRequest {
            provider: "Google".into(),
            oauth_id: "g-123".into(),
            email: email.into(),
            name: "Olga".into(),
            avatar_url: avatar.map(Into::into),
        }
    }

    #[test]
    fn email_syntax() {
        assert!(is_valid_email("a.b+c@example.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@example.com"));
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn register_then_resolve_yields_same_user() {
        let fake = AppState::fake();
        let st = &fake.state;
        let (user, token) = register(st, register_req(" Ann@Example.com ", "secret1", "Ann"))
            .await
            .unwrap();
        assert_eq!(user.email, "ann@example.com");
        assert_eq!(user.role, "user");
        assert!(user.avatar_url.unwrap().contains("seed=ann@example.com"));

        let resolved = resolve_session(st, Some(&token)).await.unwrap();
        assert_eq!(resolved.email, "ann@example.com");
        let json = serde_json::to_string(&PublicUser::from(resolved)).unwrap();
        assert!(!json.contains("password"));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let fake = AppState::fake();
        let st = &fake.state;
        for req in [
            register_req("not-an-email", "secret1", "Ann"),
            register_req("ann@example.com", "short", "Ann"),
            register_req("ann@example.com", "secret1", "A"),
        ] {
            let err = register(st, req).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{err:?}");
        }
    }

    #[tokio::test]
    async fn register_rejects_taken_email() {
        let fake = AppState::fake();
        let st = &fake.state;
        register(st, register_req("ann@example.com", "secret1", "Ann"))
            .await
            .unwrap();
        let err = register(st, register_req("ANN@example.com", "other12", "Ann"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn login_errors_do_not_reveal_which_part_was_wrong() {
        let fake = AppState::fake();
        let st = &fake.state;
        register(st, register_req("ann@example.com", "secret1", "Ann"))
            .await
            .unwrap();

        let (user, token) = login(st, login_req("Ann@Example.com", "secret1")).await.unwrap();
        assert_eq!(user.email, "ann@example.com");
        assert!(resolve_session(st, Some(&token)).await.is_ok());

        let wrong_pw = login(st, login_req("ann@example.com", "secret2")).await.unwrap_err();
        let no_user = login(st, login_req("bob@example.com", "secret1")).await.unwrap_err();
        assert!(matches!(wrong_pw, AppError::Authentication(_)));
        assert!(matches!(no_user, AppError::Authentication(_)));
        assert_eq!(wrong_pw.to_string(), no_user.to_string());
        assert_eq!(wrong_pw.to_string(), INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let fake = AppState::fake();
        let err = login(&fake.state, login_req("", "secret1")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn sessions_from_separate_logins_coexist() {
        let fake = AppState::fake();
        let st = &fake.state;
        let (_, first) = register(st, register_req("ann@example.com", "secret1", "Ann"))
            .await
            .unwrap();
        let (_, second) = login(st, login_req("ann@example.com", "secret1")).await.unwrap();
        assert_ne!(first, second);
        assert!(resolve_session(st, Some(&first)).await.is_ok());
        assert!(resolve_session(st, Some(&second)).await.is_ok());
    }

    #[tokio::test]
    async fn session_expires_exactly_at_its_deadline() {
        let fake = AppState::fake();
        let st = &fake.state;
        let start = st.clock.now();
        let (_, token) = register(st, register_req("ann@example.com", "secret1", "Ann"))
            .await
            .unwrap();
        let expires_at = start + Duration::days(30);

        fake.clock.set(expires_at - Duration::seconds(1));
        assert!(resolve_session(st, Some(&token)).await.is_ok());

        fake.clock.set(expires_at + Duration::seconds(1));
        let err = resolve_session(st, Some(&token)).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn resolve_rejects_missing_and_unknown_tokens() {
        let fake = AppState::fake();
        let st = &fake.state;
        for token in [None, Some(""), Some("   "), Some("nope")] {
            let err = resolve_session(st, token).await.unwrap_err();
            assert!(matches!(err, AppError::Authentication(_)));
        }
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_kills_the_session() {
        let fake = AppState::fake();
        let st = &fake.state;
        let (_, token) = register(st, register_req("ann@example.com", "secret1", "Ann"))
            .await
            .unwrap();

        logout(st, Some(&token)).await.unwrap();
        logout(st, Some(&token)).await.unwrap();
        logout(st, Some("unknown-token")).await.unwrap();
        logout(st, None).await.unwrap();

        assert!(resolve_session(st, Some(&token)).await.is_err());
        // Soft invalidation: the row survives with its expiry pulled in.
        let session = fake.store.find_session(&token).await.unwrap().unwrap();
        assert_eq!(session.expires_at, st.clock.now());
    }

    #[tokio::test]
    async fn logout_leaves_other_sessions_alone() {
        let fake = AppState::fake();
        let st = &fake.state;
        let (_, first) = register(st, register_req("ann@example.com", "secret1", "Ann"))
            .await
            .unwrap();
        let (_, second) = login(st, login_req("ann@example.com", "secret1")).await.unwrap();
        logout(st, Some(&first)).await.unwrap();
        assert!(resolve_session(st, Some(&second)).await.is_ok());
    }

    #[tokio::test]
    async fn oauth_creates_then_reuses_account() {
        let fake = AppState::fake();
        let st = &fake.state;
        let (user, token, is_new) = oauth(st, oauth_req("Olga@Mail.com", Some("https://a/1.png")))
            .await
            .unwrap();
        assert!(is_new);
        assert_eq!(user.email, "olga@mail.com");
        assert_eq!(user.avatar_url.as_deref(), Some("https://a/1.png"));
        assert!(resolve_session(st, Some(&token)).await.is_ok());

        let (again, token2, is_new) = oauth(st, oauth_req("olga@mail.com", Some("https://a/2.png")))
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(again.id, user.id);
        // Existing avatar is kept.
        assert_eq!(again.avatar_url.as_deref(), Some("https://a/1.png"));
        assert_ne!(token, token2);
    }

    #[tokio::test]
    async fn oauth_backfills_missing_avatar() {
        let fake = AppState::fake();
        let st = &fake.state;
        let (_, token) = register(st, register_req("olga@mail.com", "secret1", "Olga"))
            .await
            .unwrap();
        let clear = UpdateProfileRequest {
            name: None,
            avatar_url: Some(String::new()),
        };
        let cleared = update_profile(st, Some(&token), clear).await.unwrap();
        assert_eq!(cleared.avatar_url, None);

        let (user, _, is_new) = oauth(st, oauth_req("olga@mail.com", Some("https://a/3.png")))
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(user.avatar_url.as_deref(), Some("https://a/3.png"));
    }

    #[tokio::test]
    async fn oauth_account_has_no_usable_password() {
        let fake = AppState::fake();
        let st = &fake.state;
        oauth(st, oauth_req("olga@mail.com", None)).await.unwrap();
        let err = login(st, login_req("olga@mail.com", "secret1")).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn oauth_requires_provider_email_and_name() {
        let fake = AppState::fake();
        let mut req = oauth_req("olga@mail.com", None);
        req.provider = " ".into();
        let err = oauth(&fake.state, req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn update_profile_applies_only_supplied_fields() {
        let fake = AppState::fake();
        let st = &fake.state;
        let (before, token) = register(st, register_req("ann@example.com", "secret1", "Ann"))
            .await
            .unwrap();

        let req = UpdateProfileRequest {
            name: Some("  Annabel ".into()),
            avatar_url: None,
        };
        let after = update_profile(st, Some(&token), req).await.unwrap();
        assert_eq!(after.name, "Annabel");
        assert_eq!(after.avatar_url, before.avatar_url);
        assert_eq!(get_profile(st, Some(&token)).await.unwrap(), after);
    }

    #[tokio::test]
    async fn update_profile_needs_a_field_and_a_session() {
        let fake = AppState::fake();
        let st = &fake.state;
        let (_, token) = register(st, register_req("ann@example.com", "secret1", "Ann"))
            .await
            .unwrap();

        let err = update_profile(st, Some(&token), UpdateProfileRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let short = UpdateProfileRequest {
            name: Some("A".into()),
            avatar_url: None,
        };
        let err = update_profile(st, Some(&token), short).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = update_profile(st, None, UpdateProfileRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }
}
