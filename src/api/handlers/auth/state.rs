//! Auth state and configuration.

use std::sync::Arc;

use crate::cache::IdempotencyCache;
use crate::credentials::CredentialService;
use crate::session::SessionKeeper;
use crate::tokens::TokenFamilyManager;

use super::rate_limit::RateLimiter;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 30;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    public_base_url: String,
    frontend_base_url: String,
    session_ttl_seconds: i64,
    lockout_threshold: i32,
    rate_limit_per_minute: u32,
}

impl AuthConfig {
    #[must_use]
    pub fn new(public_base_url: String, frontend_base_url: String) -> Self {
        Self {
            public_base_url,
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            lockout_threshold: crate::credentials::DEFAULT_LOCKOUT_THRESHOLD,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: i32) -> Self {
        self.lockout_threshold = threshold.max(1);
        self
    }

    /// Zero disables rate limiting entirely.
    #[must_use]
    pub fn with_rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = limit;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn lockout_threshold(&self) -> i32 {
        self.lockout_threshold
    }

    pub(crate) fn rate_limit_per_minute(&self) -> u32 {
        self.rate_limit_per_minute
    }

    pub(super) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    // Only mark cookies secure when the service is reached over HTTPS.
    pub(super) fn session_cookie_secure(&self) -> bool {
        self.public_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    keeper: SessionKeeper,
    credentials: Arc<CredentialService>,
    tokens: Arc<TokenFamilyManager>,
    cache: Arc<dyn IdempotencyCache>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        keeper: SessionKeeper,
        credentials: Arc<CredentialService>,
        tokens: Arc<TokenFamilyManager>,
        cache: Arc<dyn IdempotencyCache>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            keeper,
            credentials,
            tokens,
            cache,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn keeper(&self) -> &SessionKeeper {
        &self.keeper
    }

    pub(super) fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    pub(super) fn tokens(&self) -> &TokenFamilyManager {
        &self.tokens
    }

    pub(crate) fn cache(&self) -> &dyn IdempotencyCache {
        self.cache.as_ref()
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
