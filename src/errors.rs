//! Error taxonomy shared by the auth services and HTTP handlers.

use crate::tokens::reuse::ReuseSeverity;
use thiserror::Error;

/// Outcomes of credential, session and refresh-token operations.
///
/// Handlers map variants to HTTP statuses; infrastructure failures are
/// logged at the point of capture and surface only as [`AuthError::Unknown`]
/// so internals never leak to clients.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong username, organisation or password. Deliberately opaque.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Account deactivated, either manually or by the failed-login lockout.
    #[error("user is blocked")]
    UserBlocked,

    /// Request rejected by the rate limiter.
    #[error("too many requests")]
    RateLimited,

    /// Presented refresh token does not exist.
    #[error("refresh token not found")]
    RefreshTokenNotFound,

    /// Presented refresh token belongs to a revoked family or device.
    #[error("refresh token revoked")]
    RefreshTokenRevoked,

    /// Presented refresh token is past its end of life.
    #[error("refresh token expired")]
    RefreshTokenExpired,

    /// A superseded token was presented outside the benign retry window.
    #[error("refresh token reuse detected ({severity} severity)")]
    ReuseDetected { severity: ReuseSeverity },

    /// Store or crypto failure; details stay in the logs.
    #[error("internal error")]
    Unknown,
}

impl AuthError {
    /// Stable machine-readable code returned in `{"error": code}` bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::UserBlocked => "user_blocked",
            Self::RateLimited => "too_many_requests",
            Self::RefreshTokenNotFound => "refresh_token_not_found",
            Self::RefreshTokenRevoked => "refresh_token_revoked",
            Self::RefreshTokenExpired => "refresh_token_expired",
            Self::ReuseDetected { .. } => "refresh_token_reuse_detected",
            Self::Unknown => "unknown_error",
        }
    }
}
