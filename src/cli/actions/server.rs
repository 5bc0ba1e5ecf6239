use crate::{
    api,
    cache::RedisIdempotencyCache,
    session::SessionKeeper,
    tokens::{SweepConfig, TokenPolicy},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub base_url: String,
    pub frontend_base_url: String,
    pub session_key: Option<SecretString>,
    pub session_ttl_seconds: i64,
    pub lockout_threshold: i32,
    pub rate_limit_per_minute: u32,
    pub token_ttl_seconds: i64,
    pub token_min_remaining_seconds: i64,
    pub token_retry_window_ms: i64,
    pub token_sweep_interval_seconds: u64,
    pub redis_url: Option<String>,
    pub idempotency_ttl_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the session key is malformed or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let keeper = match &args.session_key {
        Some(key) => SessionKeeper::from_base64(key).context("Invalid session key")?,
        None => {
            warn!("No session key configured, sessions will not survive a restart");
            SessionKeeper::ephemeral()
        }
    };

    // The cache is optional: a missing or unreachable Redis leaves refresh
    // replays to the reuse heuristic.
    let cache = match &args.redis_url {
        Some(url) => {
            match RedisIdempotencyCache::connect(url, args.idempotency_ttl_seconds).await {
                Ok(cache) => cache,
                Err(err) => {
                    warn!("Idempotency cache unavailable, degrading to misses: {err:#}");
                    RedisIdempotencyCache::disabled()
                }
            }
        }
        None => RedisIdempotencyCache::disabled(),
    };

    let auth_config = api::handlers::auth::AuthConfig::new(args.base_url, args.frontend_base_url)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_lockout_threshold(args.lockout_threshold)
        .with_rate_limit_per_minute(args.rate_limit_per_minute);

    let token_policy = TokenPolicy::new()
        .with_token_ttl_seconds(args.token_ttl_seconds)
        .with_min_remaining_seconds(args.token_min_remaining_seconds)
        .with_retry_window_ms(args.token_retry_window_ms);

    let sweep = SweepConfig::new().with_interval_seconds(args.token_sweep_interval_seconds);

    api::new(
        args.port,
        args.dsn,
        keeper,
        Arc::new(cache),
        auth_config,
        token_policy,
        sweep,
    )
    .await
}
