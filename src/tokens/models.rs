use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use sqlx::{FromRow, Row, postgres::PgRow};
use uuid::Uuid;

/// Client facts recorded at issuance and compared during reuse detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: String,
    pub fingerprint: String,
}

/// A refresh-token row.
///
/// The opaque `secret` is stored verbatim: issuance must be able to hand the
/// family's current token back to a device that logs in again while it still
/// has plenty of life left. Superseded rows are kept until end of life so a
/// replayed old token can be recognised instead of looking unknown.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub family_id: Uuid,
    pub secret: String,
    pub issued_ip: String,
    pub device_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub end_of_life: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub superseded_by: Option<Uuid>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl RefreshToken {
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    #[must_use]
    pub fn is_superseded(&self) -> bool {
        self.superseded_at.is_some()
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_of_life <= now
    }

    /// Remaining lifetime at `now`; negative once expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.end_of_life - now
    }
}

impl<'r> FromRow<'r, PgRow> for RefreshToken {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            device_id: row.try_get("device_id")?,
            family_id: row.try_get("family_id")?,
            secret: row.try_get("secret")?,
            issued_ip: row.try_get("issued_ip")?,
            device_fingerprint: row.try_get("device_fingerprint")?,
            created_at: row.try_get("created_at")?,
            end_of_life: row.try_get("end_of_life")?,
            superseded_at: row.try_get("superseded_at")?,
            superseded_by: row.try_get("superseded_by")?,
            revoked_at: row.try_get("revoked_at")?,
            revoked_reason: row.try_get("revoked_reason")?,
        })
    }
}

/// A token about to be inserted; `created_at` is assigned by the database.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub family_id: Uuid,
    pub secret: String,
    pub issued_ip: String,
    pub device_fingerprint: String,
    pub end_of_life: DateTime<Utc>,
}

impl NewRefreshToken {
    /// Mint a token with a fresh id and random secret.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub fn mint(
        user_id: Uuid,
        device_id: Uuid,
        family_id: Uuid,
        context: &ClientContext,
        end_of_life: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            user_id,
            device_id,
            family_id,
            secret: generate_token_secret()?,
            issued_ip: context.ip.clone(),
            device_fingerprint: context.fingerprint.clone(),
            end_of_life,
        })
    }
}

/// What the caller gets back from issuance or rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub secret: String,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub family_id: Uuid,
    pub end_of_life: DateTime<Utc>,
}

impl IssuedToken {
    pub(crate) fn from_row(token: &RefreshToken) -> Self {
        Self {
            secret: token.secret.clone(),
            user_id: token.user_id,
            device_id: token.device_id,
            family_id: token.family_id,
            end_of_life: token.end_of_life,
        }
    }

    pub(crate) fn from_new(token: &NewRefreshToken) -> Self {
        Self {
            secret: token.secret.clone(),
            user_id: token.user_id,
            device_id: token.device_id,
            family_id: token.family_id,
            end_of_life: token.end_of_life,
        }
    }
}

/// 256-bit random secret, URL-safe base64 without padding.
fn generate_token_secret() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token secret")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
