//! Small helpers for request validation and client context extraction.

use axum::{
    Json,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::tokens::ClientContext;

use super::types::ErrorResponse;

/// Usernames are short handles, two to six word characters.
pub(super) fn valid_username(username: &str) -> bool {
    Regex::new(r"^\w{2,6}$").is_ok_and(|regex| regex.is_match(username))
}

pub(super) fn parse_uuid(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}

/// Extract a client IP from common proxy headers.
pub(super) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Device fingerprint for reuse classification: an explicit header when the
/// client sends one, otherwise a hash of the user agent.
pub(super) fn device_fingerprint(headers: &HeaderMap) -> String {
    let explicit = headers
        .get("x-device-fingerprint")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(fingerprint) = explicit {
        return fingerprint.to_string();
    }
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map_or_else(|| "unknown".to_string(), sha256_hex)
}

/// The request's view of the caller, recorded with every issued token and
/// compared on reuse.
pub(super) fn client_context(headers: &HeaderMap) -> ClientContext {
    ClientContext {
        ip: extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string()),
        fingerprint: device_fingerprint(headers),
    }
}

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(super) fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(super) fn error_response(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
        }),
    )
        .into_response()
}

pub(super) fn bad_request(code: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, code)
}
