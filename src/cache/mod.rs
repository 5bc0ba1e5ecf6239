//! Short-lived idempotency cache for refresh responses.
//!
//! Backed by redis when configured, absent otherwise. Every failure mode
//! degrades to a cache miss so refresh traffic never depends on the cache
//! being up.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const DEFAULT_IDEMPOTENCY_TTL_SECONDS: u64 = 10;

const REDIS_DEADLINE: Duration = Duration::from_secs(1);
const KEY_PREFIX: &str = "gardisto:refresh:";

/// A refresh response worth replaying to a retry of the same request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CachedRefresh {
    pub body: String,
    pub session_cookie: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheStatus {
    Disabled,
    Degraded,
    Ok,
}

impl CacheStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Degraded => "degraded",
            Self::Ok => "ok",
        }
    }
}

/// Cache key over the presented secret and the caller's context, so only the
/// same client retrying the same rotation can hit an entry.
#[must_use]
pub fn idempotency_key(
    secret: &str,
    ip: &str,
    fingerprint: &str,
    client_key: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\n");
    hasher.update(ip.as_bytes());
    hasher.update(b"\n");
    hasher.update(fingerprint.as_bytes());
    if let Some(client_key) = client_key {
        hasher.update(b"\n");
        hasher.update(client_key.as_bytes());
    }
    format!("{KEY_PREFIX}{:x}", hasher.finalize())
}

#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Never fails: unreachable or unreadable entries are misses.
    async fn get(&self, key: &str) -> Option<CachedRefresh>;

    /// Best effort: a failed write is logged and dropped.
    async fn put(&self, key: &str, value: &CachedRefresh);

    async fn status(&self) -> CacheStatus;
}

pub struct RedisIdempotencyCache {
    pool: Option<bb8::Pool<RedisConnectionManager>>,
    ttl_seconds: u64,
}

impl RedisIdempotencyCache {
    /// Connect and ping once so a dead backend is visible at startup. The
    /// cache still degrades to misses if redis dies later.
    ///
    /// # Errors
    /// When the URL is invalid or redis does not answer the first ping.
    pub async fn connect(url: &str, ttl_seconds: u64) -> Result<Self> {
        let manager = RedisConnectionManager::new(url).context("invalid redis URL")?;
        let pool = bb8::Pool::builder()
            .max_size(5)
            .connection_timeout(REDIS_DEADLINE)
            .build(manager)
            .await
            .context("failed to build redis pool")?;

        {
            let mut conn = pool.get().await.context("failed to reach redis")?;
            let _: String = timeout(REDIS_DEADLINE, conn.ping())
                .await
                .context("redis ping timed out")?
                .context("redis ping failed")?;
        }
        debug!("idempotency cache connected");

        Ok(Self {
            pool: Some(pool),
            ttl_seconds: ttl_seconds.max(1),
        })
    }

    /// A cache that misses forever, for deployments without redis.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            pool: None,
            ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(&self, key: &str) -> Option<CachedRefresh> {
        let pool = self.pool.as_ref()?;
        let mut conn = match timeout(REDIS_DEADLINE, pool.get()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                warn!("idempotency cache unreachable: {err}");
                return None;
            }
            Err(_) => {
                warn!("idempotency cache connection timed out");
                return None;
            }
        };

        let raw: Option<String> = match timeout(REDIS_DEADLINE, conn.get(key)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                warn!("idempotency cache read failed: {err}");
                return None;
            }
            Err(_) => {
                warn!("idempotency cache read timed out");
                return None;
            }
        };
        let raw = raw?;

        match serde_json::from_str(&raw) {
            Ok(cached) => {
                debug!("idempotency cache hit");
                Some(cached)
            }
            Err(err) => {
                warn!("idempotency cache entry unreadable: {err}");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: &CachedRefresh) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(err) => {
                warn!("idempotency cache entry unserializable: {err}");
                return;
            }
        };

        let mut conn = match timeout(REDIS_DEADLINE, pool.get()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                warn!("idempotency cache unreachable: {err}");
                return;
            }
            Err(_) => {
                warn!("idempotency cache connection timed out");
                return;
            }
        };

        match timeout(
            REDIS_DEADLINE,
            conn.set_ex::<_, _, ()>(key, json, self.ttl_seconds),
        )
        .await
        {
            Ok(Ok(())) => debug!("idempotency cache write"),
            Ok(Err(err)) => warn!("idempotency cache write failed: {err}"),
            Err(_) => warn!("idempotency cache write timed out"),
        }
    }

    async fn status(&self) -> CacheStatus {
        let Some(pool) = self.pool.as_ref() else {
            return CacheStatus::Disabled;
        };
        let Ok(Ok(mut conn)) = timeout(REDIS_DEADLINE, pool.get()).await else {
            return CacheStatus::Degraded;
        };
        match timeout(REDIS_DEADLINE, conn.ping::<String>()).await {
            Ok(Ok(_)) => CacheStatus::Ok,
            _ => CacheStatus::Degraded,
        }
    }
}
