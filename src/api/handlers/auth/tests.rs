//! Auth handler tests over in-memory stores.

#![allow(clippy::unwrap_used)]

use super::rate_limit::{NoopRateLimiter, RateLimiter, SlidingWindowRateLimiter};
use super::session::SESSION_COOKIE_NAME;
use super::state::{AuthConfig, AuthState};
use super::types::{ErrorResponse, LoginRequest, LoginResponse, RefreshResponse, SessionResponse};
use super::{login::login, refresh::refresh, session::logout, session::session};
use crate::alerts::LogAlertSink;
use crate::cache::{CacheStatus, CachedRefresh, IdempotencyCache};
use crate::credentials::password::hash_password;
use crate::credentials::{CredentialService, User, UserStore};
use crate::session::SessionKeeper;
use crate::tokens::{
    NewRefreshToken, RefreshToken, SupersedeOutcome, TokenFamilyManager, TokenPolicy, TokenStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Json,
    body::to_bytes,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    fn insert(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    fn get(&self, id: Uuid) -> User {
        self.users.lock().unwrap().get(&id).cloned().unwrap()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_for_login(&self, username: &str, organisation_id: Uuid) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == username && u.organisation_id == organisation_id)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn record_failure(&self, user_id: Uuid, lockout_threshold: i32) -> Result<i32> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).unwrap();
        user.failed_login_count += 1;
        if user.failed_login_count >= lockout_threshold {
            user.active = false;
        }
        Ok(user.failed_login_count)
    }

    async fn reset_failures(&self, user_id: Uuid) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        users.get_mut(&user_id).unwrap().failed_login_count = 0;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryTokenStore {
    rows: Mutex<Vec<RefreshToken>>,
    supersede_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl MemoryTokenStore {
    fn materialize(new: &NewRefreshToken) -> RefreshToken {
        RefreshToken {
            id: new.id,
            user_id: new.user_id,
            device_id: new.device_id,
            family_id: new.family_id,
            secret: new.secret.clone(),
            issued_ip: new.issued_ip.clone(),
            device_fingerprint: new.device_fingerprint.clone(),
            created_at: Utc::now(),
            end_of_life: new.end_of_life,
            superseded_at: None,
            superseded_by: None,
            revoked_at: None,
            revoked_reason: None,
        }
    }

    fn row_by_secret(&self, secret: &str) -> RefreshToken {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.secret == secret)
            .cloned()
            .unwrap()
    }

    fn backdate_supersede(&self, secret: &str, ms: i64) {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.iter_mut().find(|r| r.secret == secret).unwrap();
        let at = row.superseded_at.unwrap();
        row.superseded_at = Some(at - Duration::milliseconds(ms));
    }

    fn live_rows(&self) -> usize {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.revoked_at.is_none())
            .count()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: &NewRefreshToken) -> Result<()> {
        self.rows.lock().unwrap().push(Self::materialize(token));
        Ok(())
    }

    async fn find_by_secret(&self, secret: &str) -> Result<Option<RefreshToken>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.secret == secret)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn find_current(&self, user_id: Uuid, device_id: Uuid) -> Result<Option<RefreshToken>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.user_id == user_id
                    && r.device_id == device_id
                    && r.superseded_at.is_none()
                    && r.revoked_at.is_none()
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn supersede(
        &self,
        superseded_id: Uuid,
        successor: &NewRefreshToken,
    ) -> Result<SupersedeOutcome> {
        self.supersede_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| r.id == superseded_id) else {
            return Ok(SupersedeOutcome::Lost);
        };
        if row.superseded_at.is_some() || row.revoked_at.is_some() {
            return Ok(SupersedeOutcome::Lost);
        }
        row.superseded_at = Some(Utc::now());
        row.superseded_by = Some(successor.id);
        rows.push(Self::materialize(successor));
        Ok(SupersedeOutcome::Superseded)
    }

    async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut revoked = 0;
        for row in rows
            .iter_mut()
            .filter(|r| r.family_id == family_id && r.revoked_at.is_none())
        {
            row.revoked_at = Some(Utc::now());
            row.revoked_reason = Some(reason.to_string());
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn revoke_device(&self, user_id: Uuid, device_id: Uuid, reason: &str) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut revoked = 0;
        for row in rows.iter_mut().filter(|r| {
            r.user_id == user_id && r.device_id == device_id && r.revoked_at.is_none()
        }) {
            row.revoked_at = Some(Utc::now());
            row.revoked_reason = Some(reason.to_string());
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.end_of_life > now);
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
struct MemoryIdempotencyCache {
    entries: Mutex<HashMap<String, CachedRefresh>>,
}

impl MemoryIdempotencyCache {
    fn expire_all(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[async_trait]
impl IdempotencyCache for MemoryIdempotencyCache {
    async fn get(&self, key: &str) -> Option<CachedRefresh> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    async fn put(&self, key: &str, value: &CachedRefresh) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
    }

    async fn status(&self) -> CacheStatus {
        CacheStatus::Ok
    }
}

struct Harness {
    state: Arc<AuthState>,
    users: Arc<MemoryUserStore>,
    tokens: Arc<MemoryTokenStore>,
    cache: Arc<MemoryIdempotencyCache>,
    keeper: SessionKeeper,
}

fn harness() -> Harness {
    harness_with_limiter(Arc::new(NoopRateLimiter))
}

fn harness_with_limiter(limiter: Arc<dyn RateLimiter>) -> Harness {
    let users = Arc::new(MemoryUserStore::default());
    let tokens = Arc::new(MemoryTokenStore::default());
    let cache = Arc::new(MemoryIdempotencyCache::default());
    let keeper = SessionKeeper::ephemeral();

    let credentials = Arc::new(CredentialService::new(
        users.clone(),
        Arc::new(LogAlertSink),
    ));
    let manager = Arc::new(TokenFamilyManager::new(
        tokens.clone(),
        Arc::new(LogAlertSink),
        TokenPolicy::new(),
    ));
    let state = Arc::new(AuthState::new(
        AuthConfig::new(
            "https://auth.example.test".to_string(),
            "https://app.example.test".to_string(),
        ),
        keeper.clone(),
        credentials,
        manager,
        cache.clone(),
        limiter,
    ));

    Harness {
        state,
        users,
        tokens,
        cache,
        keeper,
    }
}

fn seed_user(harness: &Harness, username: &str, password: &str) -> User {
    let user = User {
        id: Uuid::new_v4(),
        organisation_id: Uuid::new_v4(),
        organisation_acronym: "ACME".to_string(),
        name: "Mana Admin".to_string(),
        username: username.to_string(),
        password_hash: hash_password(password).unwrap(),
        role: 3,
        active: true,
        failed_login_count: 0,
        created_at: Utc::now(),
    };
    harness.users.insert(user.clone());
    user
}

fn client_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static("192.0.2.1"));
    headers.insert("x-device-fingerprint", HeaderValue::from_static("fp-1"));
    headers
}

fn login_request(user: &User, device_id: Uuid, password: &str) -> LoginRequest {
    LoginRequest {
        username: user.username.clone(),
        organisation_id: user.organisation_id.to_string(),
        device_id: device_id.to_string(),
        password: password.to_string(),
    }
}

async fn do_login(harness: &Harness, request: LoginRequest) -> Response {
    login(
        client_headers(),
        Extension(harness.state.clone()),
        Some(Json(request)),
    )
    .await
    .into_response()
}

async fn do_refresh(harness: &Harness, token: &str) -> Response {
    let mut headers = client_headers();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    refresh(headers, Extension(harness.state.clone()))
        .await
        .into_response()
}

fn set_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn cookie_payload(cookie: &str) -> String {
    cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix(&format!("{SESSION_COOKIE_NAME}=")))
        .unwrap()
        .to_string()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .context("failed to read response body")?;
    serde_json::from_slice(&bytes).context("failed to decode response body")
}

#[tokio::test]
async fn login_returns_token_and_session_cookie() -> Result<()> {
    let harness = harness();
    let user = seed_user(&harness, "mana", "s3cret-pw");
    let device_id = Uuid::new_v4();

    let response = do_login(&harness, login_request(&user, device_id, "s3cret-pw")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie(&response).context("missing session cookie")?;
    assert!(cookie.starts_with("gardisto_session="));
    assert!(cookie.contains("HttpOnly"));

    // The cookie decrypts back to the logged-in user's session.
    let session = harness
        .keeper
        .open(&cookie_payload(&cookie))
        .context("cookie did not decrypt")?;
    assert_eq!(session.username, "mana");
    assert_eq!(session.organisation, "ACME");
    assert_eq!(session.role, 3);

    let body: LoginResponse = read_json(response).await?;
    assert!(!body.refresh_token.is_empty());
    let row = harness.tokens.row_by_secret(&body.refresh_token);
    assert_eq!(row.user_id, user.id);
    assert_eq!(row.device_id, device_id);
    Ok(())
}

#[tokio::test]
async fn login_resets_failure_counter_after_wrong_attempts() -> Result<()> {
    let harness = harness();
    let user = seed_user(&harness, "mana", "s3cret-pw");
    let device_id = Uuid::new_v4();

    for _ in 0..3 {
        let response = do_login(&harness, login_request(&user, device_id, "wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = read_json(response).await?;
        assert_eq!(body.error, "authentication_failed");
    }
    assert_eq!(harness.users.get(user.id).failed_login_count, 3);

    let response = do_login(&harness, login_request(&user, device_id, "s3cret-pw")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.users.get(user.id).failed_login_count, 0);
    Ok(())
}

#[tokio::test]
async fn login_rejects_malformed_requests() -> Result<()> {
    let harness = harness();
    let user = seed_user(&harness, "mana", "s3cret-pw");
    let device_id = Uuid::new_v4();

    let response = login(client_headers(), Extension(harness.state.clone()), None)
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = read_json(response).await?;
    assert_eq!(body.error, "missing_payload");

    let mut request = login_request(&user, device_id, "s3cret-pw");
    request.username = "this-name-is-too-long".to_string();
    let response = do_login(&harness, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut request = login_request(&user, device_id, "s3cret-pw");
    request.organisation_id = "not-a-uuid".to_string();
    let response = do_login(&harness, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut request = login_request(&user, device_id, "s3cret-pw");
    request.device_id = "42".to_string();
    let response = do_login(&harness, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut request = login_request(&user, device_id, "s3cret-pw");
    request.password = String::new();
    let response = do_login(&harness, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Malformed requests never reach the token store.
    assert_eq!(harness.tokens.rows.lock().unwrap().len(), 0);
    Ok(())
}

#[tokio::test]
async fn blocked_user_gets_its_own_error_code() -> Result<()> {
    let harness = harness();
    let mut user = seed_user(&harness, "mana", "s3cret-pw");
    user.active = false;
    harness.users.insert(user.clone());

    let response = do_login(&harness, login_request(&user, Uuid::new_v4(), "s3cret-pw")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: ErrorResponse = read_json(response).await?;
    assert_eq!(body.error, "user_blocked");
    Ok(())
}

#[tokio::test]
async fn login_is_rate_limited_by_ip() -> Result<()> {
    let harness = harness_with_limiter(Arc::new(SlidingWindowRateLimiter::new(1)));
    let user = seed_user(&harness, "mana", "s3cret-pw");
    let device_id = Uuid::new_v4();

    let response = do_login(&harness, login_request(&user, device_id, "wrong")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = do_login(&harness, login_request(&user, device_id, "wrong")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: ErrorResponse = read_json(response).await?;
    assert_eq!(body.error, "too_many_requests");
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_reissues_the_cookie() -> Result<()> {
    let harness = harness();
    let user = seed_user(&harness, "mana", "s3cret-pw");

    let response = do_login(&harness, login_request(&user, Uuid::new_v4(), "s3cret-pw")).await;
    let issued: LoginResponse = read_json(response).await?;

    let response = do_refresh(&harness, &issued.refresh_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie(&response).context("missing reissued cookie")?;
    assert!(harness.keeper.open(&cookie_payload(&cookie)).is_some());

    let body: RefreshResponse = read_json(response).await?;
    assert_ne!(body.new_token, issued.refresh_token);

    let old = harness.tokens.row_by_secret(&issued.refresh_token);
    assert!(old.is_superseded());
    Ok(())
}

#[tokio::test]
async fn refresh_retry_replays_the_response_without_rotating_again() -> Result<()> {
    let harness = harness();
    let user = seed_user(&harness, "mana", "s3cret-pw");

    let response = do_login(&harness, login_request(&user, Uuid::new_v4(), "s3cret-pw")).await;
    let issued: LoginResponse = read_json(response).await?;

    let first = do_refresh(&harness, &issued.refresh_token).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first_cookie = set_cookie(&first).context("missing cookie")?;
    let first_body = to_bytes(first.into_body(), usize::MAX).await?;

    let rotations = harness.tokens.supersede_calls.load(Ordering::SeqCst);
    let lookups = harness.tokens.lookup_calls.load(Ordering::SeqCst);
    assert_eq!(rotations, 1);

    // The retry is served from the cache: identical bytes, identical cookie,
    // and the token store is never consulted again.
    let second = do_refresh(&harness, &issued.refresh_token).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second_cookie = set_cookie(&second).context("missing cookie")?;
    let second_body = to_bytes(second.into_body(), usize::MAX).await?;

    assert_eq!(first_body, second_body);
    assert_eq!(first_cookie, second_cookie);
    assert_eq!(harness.tokens.supersede_calls.load(Ordering::SeqCst), rotations);
    assert_eq!(harness.tokens.lookup_calls.load(Ordering::SeqCst), lookups);
    Ok(())
}

#[tokio::test]
async fn refresh_without_bearer_is_unauthorized() -> Result<()> {
    let harness = harness();
    let response = refresh(client_headers(), Extension(harness.state.clone()))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: ErrorResponse = read_json(response).await?;
    assert_eq!(body.error, "missing_refresh_token");
    Ok(())
}

#[tokio::test]
async fn refresh_unknown_token_is_not_found() -> Result<()> {
    let harness = harness();
    let response = do_refresh(&harness, "no-such-token").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = read_json(response).await?;
    assert_eq!(body.error, "refresh_token_not_found");
    Ok(())
}

#[tokio::test]
async fn late_reuse_is_unauthorized_and_clears_the_cookie() -> Result<()> {
    let harness = harness();
    let user = seed_user(&harness, "mana", "s3cret-pw");

    let response = do_login(&harness, login_request(&user, Uuid::new_v4(), "s3cret-pw")).await;
    let issued: LoginResponse = read_json(response).await?;
    do_refresh(&harness, &issued.refresh_token).await;

    // Outside the retry window, presenting the superseded token is theft.
    // By then the idempotency entry has also aged out.
    harness.tokens.backdate_supersede(&issued.refresh_token, 2_000);
    harness.cache.expire_all();
    let response = do_refresh(&harness, &issued.refresh_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let cookie = set_cookie(&response).context("missing clear cookie")?;
    assert!(cookie.contains("Max-Age=0"));

    let body: ErrorResponse = read_json(response).await?;
    assert_eq!(body.error, "refresh_token_reuse_detected");
    assert_eq!(harness.tokens.live_rows(), 0);
    Ok(())
}

#[tokio::test]
async fn logout_clears_the_cookie_and_keeps_tokens_alive() -> Result<()> {
    let harness = harness();
    let user = seed_user(&harness, "mana", "s3cret-pw");
    let response = do_login(&harness, login_request(&user, Uuid::new_v4(), "s3cret-pw")).await;
    let _: LoginResponse = read_json(response).await?;

    let response = logout(Extension(harness.state.clone())).await.into_response();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookie = set_cookie(&response).context("missing clear cookie")?;
    assert!(cookie.starts_with("gardisto_session=;"));
    assert!(cookie.contains("Max-Age=0"));

    // Logout is cookie-only: the refresh token family is untouched.
    assert_eq!(harness.tokens.live_rows(), 1);
    Ok(())
}

#[tokio::test]
async fn session_endpoint_round_trip() -> Result<()> {
    let harness = harness();
    let user = seed_user(&harness, "mana", "s3cret-pw");
    let response = do_login(&harness, login_request(&user, Uuid::new_v4(), "s3cret-pw")).await;
    let cookie = set_cookie(&response).context("missing cookie")?;

    let mut headers = HeaderMap::new();
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE_NAME}={}",
            cookie_payload(&cookie)
        ))?,
    );
    let response = session(headers, Extension(harness.state.clone()))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body: SessionResponse = read_json(response).await?;
    assert_eq!(body.username, "mana");

    let response = session(HeaderMap::new(), Extension(harness.state.clone()))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let mut headers = HeaderMap::new();
    headers.insert(
        COOKIE,
        HeaderValue::from_static("gardisto_session=not-a-real-session"),
    );
    let response = session(headers, Extension(harness.state.clone()))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}
