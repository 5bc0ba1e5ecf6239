//! User store trait and its Postgres implementation.

use crate::credentials::models::User;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Persistence seam for users.
///
/// Only the login path mutates the failure counter and the active flag, so
/// the surface stays small: lookups plus the two counter operations.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by username within an organisation.
    async fn find_for_login(&self, username: &str, organisation_id: Uuid)
    -> Result<Option<User>>;

    /// Look up a user by id (used when reissuing sessions on refresh).
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Atomically increment the failed-login counter, deactivating the user
    /// when the new count reaches `lockout_threshold`. Returns the new count.
    async fn record_failure(&self, user_id: Uuid, lockout_threshold: i32) -> Result<i32>;

    /// Reset the failed-login counter after a successful login.
    async fn reset_failures(&self, user_id: Uuid) -> Result<()>;
}

const USER_COLUMNS: &str = r"
    users.id,
    users.organisation_id,
    organisations.acronym AS organisation_acronym,
    users.name,
    users.username,
    users.password_hash,
    users.role,
    users.active,
    users.failed_login_count,
    users.created_at
";

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_for_login(
        &self,
        username: &str,
        organisation_id: Uuid,
    ) -> Result<Option<User>> {
        let query = format!(
            r"
            SELECT {USER_COLUMNS}
            FROM users
            JOIN organisations ON organisations.id = users.organisation_id
            WHERE users.username = $1
              AND users.organisation_id = $2
            LIMIT 1
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        sqlx::query_as::<_, User>(&query)
            .bind(username)
            .bind(organisation_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user for login")
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!(
            r"
            SELECT {USER_COLUMNS}
            FROM users
            JOIN organisations ON organisations.id = users.organisation_id
            WHERE users.id = $1
            LIMIT 1
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")
    }

    async fn record_failure(&self, user_id: Uuid, lockout_threshold: i32) -> Result<i32> {
        // Single statement so concurrent failures cannot skip past the
        // threshold: the counter and the deactivation move together.
        let query = r"
            UPDATE users
            SET failed_login_count = failed_login_count + 1,
                active = CASE
                    WHEN failed_login_count + 1 >= $2 THEN FALSE
                    ELSE active
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING failed_login_count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(lockout_threshold)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login failure")?;
        row.try_get::<i32, _>("failed_login_count")
            .context("failed to read updated failure count")
    }

    async fn reset_failures(&self, user_id: Uuid) -> Result<()> {
        let query = r"
            UPDATE users
            SET failed_login_count = 0,
                updated_at = NOW()
            WHERE id = $1
              AND failed_login_count <> 0
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to reset login failures")?;
        Ok(())
    }
}
