//! Refresh-token store trait and its Postgres implementation.

use crate::tokens::models::{NewRefreshToken, RefreshToken};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

/// Result of the conditional supersede.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupersedeOutcome {
    /// This caller won: the old row is marked and the successor exists.
    Superseded,
    /// Another rotation or a revocation got there first; nothing changed.
    Lost,
}

/// Persistence seam for refresh tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &NewRefreshToken) -> Result<()>;

    async fn find_by_secret(&self, secret: &str) -> Result<Option<RefreshToken>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>>;

    /// Newest live (not superseded, not revoked) token for a device.
    async fn find_current(&self, user_id: Uuid, device_id: Uuid)
    -> Result<Option<RefreshToken>>;

    /// Atomically supersede `superseded_id` with `successor`.
    ///
    /// The update is conditional on the row being neither superseded nor
    /// revoked; exactly one concurrent caller can win. This is the only
    /// atomicity boundary in the rotation path.
    async fn supersede(
        &self,
        superseded_id: Uuid,
        successor: &NewRefreshToken,
    ) -> Result<SupersedeOutcome>;

    /// Revoke every live token in a family. Idempotent; returns rows changed.
    async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<u64>;

    /// Revoke every live token for a device, across families.
    async fn revoke_device(&self, user_id: Uuid, device_id: Uuid, reason: &str) -> Result<u64>;

    /// Delete rows past their end of life. Revoked and superseded rows stay
    /// until then so replays keep getting a definite answer.
    async fn purge_expired(&self) -> Result<u64>;
}

const TOKEN_COLUMNS: &str = r"
    id,
    user_id,
    device_id,
    family_id,
    secret,
    issued_ip,
    device_fingerprint,
    created_at,
    end_of_life,
    superseded_at,
    superseded_by,
    revoked_at,
    revoked_reason
";

pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: &NewRefreshToken) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens
                (id, user_id, device_id, family_id, secret,
                 issued_ip, device_fingerprint, end_of_life)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token.id)
            .bind(token.user_id)
            .bind(token.device_id)
            .bind(token.family_id)
            .bind(&token.secret)
            .bind(&token.issued_ip)
            .bind(&token.device_fingerprint)
            .bind(token.end_of_life)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token")?;
        Ok(())
    }

    async fn find_by_secret(&self, secret: &str) -> Result<Option<RefreshToken>> {
        let query =
            format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE secret = $1 LIMIT 1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(secret)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup refresh token by secret")
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE id = $1 LIMIT 1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup refresh token by id")
    }

    async fn find_current(
        &self,
        user_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<RefreshToken>> {
        let query = format!(
            r"
            SELECT {TOKEN_COLUMNS}
            FROM refresh_tokens
            WHERE user_id = $1
              AND device_id = $2
              AND superseded_at IS NULL
              AND revoked_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(user_id)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup current refresh token")
    }

    async fn supersede(
        &self,
        superseded_id: Uuid,
        successor: &NewRefreshToken,
    ) -> Result<SupersedeOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin supersede transaction")?;

        // Conditional single-row update: zero rows means somebody else
        // already superseded or revoked this token.
        let update = r"
            UPDATE refresh_tokens
            SET superseded_at = NOW(),
                superseded_by = $2
            WHERE id = $1
              AND superseded_at IS NULL
              AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = update
        );
        let result = sqlx::query(update)
            .bind(superseded_id)
            .bind(successor.id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to mark refresh token superseded")?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .context("failed to roll back lost supersede")?;
            return Ok(SupersedeOutcome::Lost);
        }

        let insert = r"
            INSERT INTO refresh_tokens
                (id, user_id, device_id, family_id, secret,
                 issued_ip, device_fingerprint, end_of_life)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = insert
        );
        sqlx::query(insert)
            .bind(successor.id)
            .bind(successor.user_id)
            .bind(successor.device_id)
            .bind(successor.family_id)
            .bind(&successor.secret)
            .bind(&successor.issued_ip)
            .bind(&successor.device_fingerprint)
            .bind(successor.end_of_life)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert successor refresh token")?;

        tx.commit()
            .await
            .context("failed to commit supersede transaction")?;
        Ok(SupersedeOutcome::Superseded)
    }

    async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<u64> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = NOW(),
                revoked_reason = $2
            WHERE family_id = $1
              AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(family_id)
            .bind(reason)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke token family")?;
        Ok(result.rows_affected())
    }

    async fn revoke_device(&self, user_id: Uuid, device_id: Uuid, reason: &str) -> Result<u64> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = NOW(),
                revoked_reason = $3
            WHERE user_id = $1
              AND device_id = $2
              AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(device_id)
            .bind(reason)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke device tokens")?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let query = "DELETE FROM refresh_tokens WHERE end_of_life <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired refresh tokens")?;
        Ok(result.rows_affected())
    }
}
