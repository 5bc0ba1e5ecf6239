//! Password login issuing a refresh token and the session cookie.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, info};

use crate::errors::AuthError;
use crate::session::Session;

use super::{
    rate_limit::{RateLimitAction, RateLimitDecision},
    session::session_cookie,
    state::AuthState,
    types::{ErrorResponse, LoginRequest, LoginResponse},
    utils::{bad_request, client_context, error_response, parse_uuid, valid_username},
};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login succeeded", body = LoginResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Authentication failed", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return bad_request("missing_payload");
    };

    let username = request.username.trim();
    if !valid_username(username) {
        return bad_request("invalid_username");
    }
    let Some(organisation_id) = parse_uuid(&request.organisation_id) else {
        return bad_request("invalid_organisation_id");
    };
    let Some(device_id) = parse_uuid(&request.device_id) else {
        return bad_request("invalid_device_id");
    };
    if request.password.is_empty() {
        return bad_request("invalid_password");
    }

    let context = client_context(&headers);
    let limiter = auth_state.rate_limiter();
    if limiter.check_ip(Some(&context.ip), RateLimitAction::Login) == RateLimitDecision::Limited
        || limiter.check_username(username, RateLimitAction::Login) == RateLimitDecision::Limited
    {
        return error_response(StatusCode::TOO_MANY_REQUESTS, AuthError::RateLimited.code());
    }

    let user = match auth_state
        .credentials()
        .verify(username, organisation_id, &request.password)
        .await
    {
        Ok(user) => user,
        Err(err) => return login_failure(&err),
    };

    // Seal the session before touching the token store so a failure here
    // leaves nothing half-committed.
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
            return login_failure(&AuthError::Unknown);
        }
    };
    let cookie = match session_cookie(auth_state.config(), &sealed) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!(user_id = %user.id, "session cookie not header-safe: {err}");
            return login_failure(&AuthError::Unknown);
        }
    };

    let issued = match auth_state.tokens().issue(user.id, device_id, &context).await {
        Ok(issued) => issued,
        Err(err) => return login_failure(&err),
    };

    info!(user_id = %user.id, device_id = %device_id, "login succeeded");
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);
    (
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            refresh_token: issued.secret,
        }),
    )
        .into_response()
}

fn login_failure(err: &AuthError) -> Response {
    match err {
        AuthError::AuthenticationFailed | AuthError::UserBlocked => {
            error_response(StatusCode::UNAUTHORIZED, err.code())
        }
        AuthError::RateLimited => error_response(StatusCode::TOO_MANY_REQUESTS, err.code()),
        _ => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Unknown.code(),
        ),
    }
}
