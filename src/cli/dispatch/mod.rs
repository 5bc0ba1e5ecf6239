//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let base_url = matches
        .get_one::<String>("base-url")
        .cloned()
        .context("missing required argument: --base-url")?;
    let frontend_base_url = matches
        .get_one::<String>("frontend-base-url")
        .cloned()
        .context("missing required argument: --frontend-base-url")?;

    let session_key = matches
        .get_one::<String>("session-key")
        .map(|key| SecretString::from(key.clone()));

    Ok(Action::Server(Args {
        port,
        dsn,
        base_url,
        frontend_base_url,
        session_key,
        session_ttl_seconds: matches
            .get_one::<i64>("session-ttl-seconds")
            .copied()
            .unwrap_or(900),
        lockout_threshold: matches
            .get_one::<i32>("lockout-threshold")
            .copied()
            .unwrap_or(5),
        rate_limit_per_minute: matches
            .get_one::<u32>("rate-limit-per-minute")
            .copied()
            .unwrap_or(30),
        token_ttl_seconds: matches
            .get_one::<i64>("token-ttl-seconds")
            .copied()
            .unwrap_or(432_000),
        token_min_remaining_seconds: matches
            .get_one::<i64>("token-min-remaining-seconds")
            .copied()
            .unwrap_or(86_400),
        token_retry_window_ms: matches
            .get_one::<i64>("token-retry-window-ms")
            .copied()
            .unwrap_or(1_000),
        token_sweep_interval_seconds: matches
            .get_one::<u64>("token-sweep-interval-seconds")
            .copied()
            .unwrap_or(600),
        redis_url: matches.get_one::<String>("redis-url").cloned(),
        idempotency_ttl_seconds: matches
            .get_one::<u64>("idempotency-ttl-seconds")
            .copied()
            .unwrap_or(10),
    }))
}
