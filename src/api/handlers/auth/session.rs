//! Session endpoints for the encrypted client-side cookie.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use std::sync::Arc;

use super::{state::AuthConfig, state::AuthState, types::SessionResponse};

pub(super) const SESSION_COOKIE_NAME: &str = "gardisto_session";

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    // A missing or unreadable cookie is simply "no session".
    let Some(sealed) = extract_session_cookie(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    match auth_state.keeper().open(&sealed) {
        Some(session) => (
            StatusCode::OK,
            Json(SessionResponse {
                name: session.name,
                username: session.username,
                organisation: session.organisation,
                role: session.role,
            }),
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // Logout only destroys the client-side session. Refresh tokens keep
    // dying through rotation, reuse detection or expiry.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// Render the `HttpOnly` session cookie for a sealed session.
pub(super) fn session_cookie_value(config: &AuthConfig, sealed: &str) -> String {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={sealed}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

pub(super) fn session_cookie(
    config: &AuthConfig,
    sealed: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&session_cookie_value(config, sealed))
}

pub(super) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// The session travels in the cookie only; the `Authorization` header is
/// reserved for refresh tokens.
pub(super) fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}
