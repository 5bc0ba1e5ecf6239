//! Auth handlers and supporting modules.
//!
//! Login verifies credentials and hands out a refresh token plus an
//! encrypted client-side session cookie. Refresh rotates the token family,
//! with reuse detection deciding between a benign retry and revocation.
//! Logout only destroys the cookie.

pub(crate) mod login;
mod rate_limit;
pub(crate) mod refresh;
pub(crate) mod session;
mod state;
pub(crate) mod types;
mod utils;

pub use rate_limit::{
    NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter, SlidingWindowRateLimiter,
};
pub use state::{AuthConfig, AuthState};

#[cfg(test)]
mod tests;
