//! Refresh token rotation with idempotent retries.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_TYPE, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::cache::{CachedRefresh, idempotency_key};
use crate::errors::AuthError;
use crate::session::Session;

use super::{
    rate_limit::{RateLimitAction, RateLimitDecision},
    session::{clear_session_cookie, session_cookie_value},
    state::{AuthConfig, AuthState},
    types::{ErrorResponse, RefreshResponse},
    utils::{client_context, error_response, extract_bearer_token},
};

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "Token rotated", body = RefreshResponse),
        (status = 401, description = "Token rejected", body = ErrorResponse),
        (status = 404, description = "Token unknown", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Some(presented) = extract_bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing_refresh_token");
    };
    let context = client_context(&headers);

    if auth_state
        .rate_limiter()
        .check_ip(Some(&context.ip), RateLimitAction::Refresh)
        == RateLimitDecision::Limited
    {
        return error_response(StatusCode::TOO_MANY_REQUESTS, AuthError::RateLimited.code());
    }

    // Retries of the same rotation from the same client replay the stored
    // response instead of hitting the token store again.
    let client_key = headers
        .get("x-idempotency-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let cache_key = idempotency_key(&presented, &context.ip, &context.fingerprint, client_key);
    if let Some(cached) = auth_state.cache().get(&cache_key).await {
        return replay_cached(&cached);
    }

    let rotated = match auth_state.tokens().rotate(&presented, &context).await {
        Ok(rotated) => rotated,
        Err(err) => return refresh_failure(auth_state.config(), &err),
    };

    // The rotated response also reissues the session cookie, so the user
    // must still exist and be active.
    let user = match auth_state.credentials().load_active(rotated.user_id).await {
        Ok(user) => user,
        Err(err) => return refresh_failure(auth_state.config(), &err),
    };

    let session = Session {
        name: user.name.clone(),
        username: user.username.clone(),
        organisation: user.organisation_acronym.clone(),
        role: user.role,
    };
    let sealed = match auth_state.keeper().seal(&session) {
        Ok(sealed) => sealed,
        Err(err) => {
            error!(user_id = %user.id, "failed to seal session: {err:#}");
            return refresh_failure(auth_state.config(), &AuthError::Unknown);
        }
    };
    let cookie_value = session_cookie_value(auth_state.config(), &sealed);
    let Ok(cookie) = HeaderValue::from_str(&cookie_value) else {
        error!(user_id = %user.id, "session cookie not header-safe");
        return refresh_failure(auth_state.config(), &AuthError::Unknown);
    };

    let body = RefreshResponse {
        new_token: rotated.secret,
    };
    match serde_json::to_string(&body) {
        Ok(json) => {
            auth_state
                .cache()
                .put(
                    &cache_key,
                    &CachedRefresh {
                        body: json,
                        session_cookie: cookie_value,
                    },
                )
                .await;
        }
        Err(err) => warn!("refresh response not cacheable: {err}"),
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);
    (StatusCode::OK, response_headers, Json(body)).into_response()
}

/// Replay a cached refresh response byte for byte.
fn replay_cached(cached: &CachedRefresh) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(cookie) = HeaderValue::from_str(&cached.session_cookie) {
        headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::OK, headers, cached.body.clone()).into_response()
}

fn refresh_failure(config: &AuthConfig, err: &AuthError) -> Response {
    let status = match err {
        AuthError::RefreshTokenNotFound => StatusCode::NOT_FOUND,
        AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AuthError::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNAUTHORIZED,
    };

    let mut headers = HeaderMap::new();
    if status == StatusCode::UNAUTHORIZED {
        // A rejected token ends the session; make the client drop the cookie.
        if let Ok(cookie) = clear_session_cookie(config) {
            headers.insert(SET_COOKIE, cookie);
        }
    }
    (
        status,
        headers,
        Json(ErrorResponse {
            error: err.code().to_string(),
        }),
    )
        .into_response()
}
