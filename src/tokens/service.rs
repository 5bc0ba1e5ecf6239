//! Issuance, rotation and revocation of refresh-token families.

use crate::alerts::{AlertSink, SecurityAlert};
use crate::errors::AuthError;
use crate::tokens::models::{ClientContext, IssuedToken, NewRefreshToken, RefreshToken};
use crate::tokens::repo::{SupersedeOutcome, TokenStore};
use crate::tokens::reuse::{DEFAULT_RETRY_WINDOW_MS, ReuseSeverity, ReuseVerdict, classify_reuse};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Each token lives five days from issuance.
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 5 * 24 * 60 * 60;
/// Tokens with more life than this are handed back as-is at login.
pub const DEFAULT_MIN_REMAINING_SECONDS: i64 = 24 * 60 * 60;

const REASON_FAMILY_REUSE: &str = "family_reuse";
const REASON_DEVICE_REUSE: &str = "device_reuse";

/// Lifetime and reuse-window knobs.
#[derive(Clone, Copy, Debug)]
pub struct TokenPolicy {
    token_ttl_seconds: i64,
    min_remaining_seconds: i64,
    retry_window_ms: i64,
}

impl TokenPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            min_remaining_seconds: DEFAULT_MIN_REMAINING_SECONDS,
            retry_window_ms: DEFAULT_RETRY_WINDOW_MS,
        }
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_min_remaining_seconds(mut self, seconds: i64) -> Self {
        self.min_remaining_seconds = seconds.max(0);
        self
    }

    #[must_use]
    pub fn with_retry_window_ms(mut self, ms: i64) -> Self {
        self.retry_window_ms = ms.max(0);
        self
    }

    fn token_ttl(&self) -> Duration {
        Duration::seconds(self.token_ttl_seconds)
    }

    fn min_remaining(&self) -> Duration {
        Duration::seconds(self.min_remaining_seconds)
    }

    fn retry_window_ms(&self) -> i64 {
        self.retry_window_ms
    }
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Manages token families over a [`TokenStore`].
///
/// There is no locking here: the store's conditional supersede is the only
/// atomicity boundary, and the benign-retry branch absorbs the race between
/// two rotations of the same token.
pub struct TokenFamilyManager {
    store: Arc<dyn TokenStore>,
    alerts: Arc<dyn AlertSink>,
    policy: TokenPolicy,
}

impl TokenFamilyManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        alerts: Arc<dyn AlertSink>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            store,
            alerts,
            policy,
        }
    }

    /// Hand a device a refresh token at login.
    ///
    /// Reuses the device's current token while it has more than the minimum
    /// remaining life, rotates it within its family when it is aging, and
    /// starts a fresh family otherwise.
    ///
    /// # Errors
    /// [`AuthError::Unknown`] on store faults.
    pub async fn issue(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        context: &ClientContext,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let current = self
            .store
            .find_current(user_id, device_id)
            .await
            .map_err(internal)?;

        if let Some(current) = current {
            if !current.is_expired(now) {
                if current.remaining(now) > self.policy.min_remaining() {
                    debug!(family_id = %current.family_id, "reusing current refresh token");
                    return Ok(IssuedToken::from_row(&current));
                }

                // Aging but alive: replace it inside the same family.
                let successor = self.mint_successor(&current, context, now)?;
                match self
                    .store
                    .supersede(current.id, &successor)
                    .await
                    .map_err(internal)?
                {
                    SupersedeOutcome::Superseded => {
                        info!(
                            family_id = %current.family_id,
                            "rotated aging refresh token at login"
                        );
                        return Ok(IssuedToken::from_new(&successor));
                    }
                    SupersedeOutcome::Lost => {
                        // A concurrent login or refresh replaced it first.
                        if let Some(winner) = self
                            .store
                            .find_current(user_id, device_id)
                            .await
                            .map_err(internal)?
                        {
                            return Ok(IssuedToken::from_row(&winner));
                        }
                    }
                }
            }
        }

        let family_id = Uuid::new_v4();
        let token = NewRefreshToken::mint(
            user_id,
            device_id,
            family_id,
            context,
            now + self.policy.token_ttl(),
        )
        .map_err(internal)?;
        self.store.insert(&token).await.map_err(internal)?;
        info!(
            user_id = %user_id,
            device_id = %device_id,
            family_id = %family_id,
            "started new refresh token family"
        );
        Ok(IssuedToken::from_new(&token))
    }

    /// Exchange a presented token for its successor.
    ///
    /// # Errors
    /// [`AuthError::RefreshTokenNotFound`] for unknown secrets,
    /// [`AuthError::RefreshTokenRevoked`] / [`AuthError::RefreshTokenExpired`]
    /// for dead tokens, [`AuthError::ReuseDetected`] when a superseded token
    /// comes back outside the benign retry branch.
    pub async fn rotate(
        &self,
        presented_secret: &str,
        context: &ClientContext,
    ) -> Result<IssuedToken, AuthError> {
        // At most two passes: the second happens only after losing the
        // conditional supersede, and by then the row is superseded or
        // revoked, so classification below terminates.
        for _ in 0..2 {
            let token = self
                .store
                .find_by_secret(presented_secret)
                .await
                .map_err(internal)?;
            let Some(token) = token else {
                return Err(AuthError::RefreshTokenNotFound);
            };

            let now = Utc::now();
            if token.is_revoked() {
                debug!(family_id = %token.family_id, "revoked refresh token presented");
                return Err(AuthError::RefreshTokenRevoked);
            }
            if token.is_expired(now) {
                debug!(family_id = %token.family_id, "expired refresh token presented");
                return Err(AuthError::RefreshTokenExpired);
            }
            if token.is_superseded() {
                return self.handle_reuse(&token, context, now).await;
            }

            let successor = self.mint_successor(&token, context, now)?;
            match self
                .store
                .supersede(token.id, &successor)
                .await
                .map_err(internal)?
            {
                SupersedeOutcome::Superseded => {
                    info!(
                        user_id = %token.user_id,
                        family_id = %token.family_id,
                        "refresh token rotated"
                    );
                    return Ok(IssuedToken::from_new(&successor));
                }
                SupersedeOutcome::Lost => {
                    debug!(family_id = %token.family_id, "lost rotation race, reclassifying");
                }
            }
        }

        error!("refresh token rotation did not settle after losing the race");
        Err(AuthError::Unknown)
    }

    /// Revoke every live token in a family.
    ///
    /// # Errors
    /// [`AuthError::Unknown`] on store faults.
    pub async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<u64, AuthError> {
        let revoked = self
            .store
            .revoke_family(family_id, reason)
            .await
            .map_err(internal)?;
        info!(%family_id, revoked, reason, "refresh token family revoked");
        Ok(revoked)
    }

    /// Revoke every live token a device holds, across families.
    ///
    /// # Errors
    /// [`AuthError::Unknown`] on store faults.
    pub async fn revoke_device(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        reason: &str,
    ) -> Result<u64, AuthError> {
        let revoked = self
            .store
            .revoke_device(user_id, device_id, reason)
            .await
            .map_err(internal)?;
        info!(%user_id, %device_id, revoked, reason, "device refresh tokens revoked");
        Ok(revoked)
    }

    fn mint_successor(
        &self,
        predecessor: &RefreshToken,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<NewRefreshToken, AuthError> {
        NewRefreshToken::mint(
            predecessor.user_id,
            predecessor.device_id,
            predecessor.family_id,
            context,
            now + self.policy.token_ttl(),
        )
        .map_err(internal)
    }

    /// A superseded token came back. Decide between a lost-response retry
    /// and actual theft, and act on the verdict.
    async fn handle_reuse(
        &self,
        token: &RefreshToken,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let Some(superseded_at) = token.superseded_at else {
            error!(token_id = %token.id, "reuse handler reached with a live token");
            return Err(AuthError::Unknown);
        };
        let elapsed_ms = (now - superseded_at).num_milliseconds();

        // The successor carries the IP and fingerprint of the rotation that
        // superseded this token; a retry of that rotation matches them.
        let successor = match token.superseded_by {
            Some(id) => self.store.find_by_id(id).await.map_err(internal)?,
            None => None,
        };
        let (same_ip, same_fingerprint) = match &successor {
            Some(successor) => (
                successor.issued_ip == context.ip,
                successor.device_fingerprint == context.fingerprint,
            ),
            // Successor purged already: the presented row's own context is
            // the best remaining comparison basis.
            None => (
                token.issued_ip == context.ip,
                token.device_fingerprint == context.fingerprint,
            ),
        };

        let verdict = classify_reuse(
            elapsed_ms,
            self.policy.retry_window_ms(),
            same_ip,
            same_fingerprint,
        );

        match verdict {
            ReuseVerdict::ReplaySuccessor => {
                if let Some(successor) = successor {
                    if successor.is_revoked() {
                        return Err(AuthError::RefreshTokenRevoked);
                    }
                    info!(
                        family_id = %token.family_id,
                        elapsed_ms,
                        "benign refresh retry, returning already-issued successor"
                    );
                    return Ok(IssuedToken::from_row(&successor));
                }
                // Nothing to replay; burning the family beats minting a
                // token outside the rotation chain.
                warn!(family_id = %token.family_id, "retry without reachable successor");
                Err(self.burn_family(token, context, elapsed_ms).await)
            }
            ReuseVerdict::RevokeFamily => Err(self.burn_family(token, context, elapsed_ms).await),
            ReuseVerdict::RevokeDevice => Err(self.burn_device(token, context, elapsed_ms).await),
        }
    }

    async fn burn_family(
        &self,
        token: &RefreshToken,
        context: &ClientContext,
        elapsed_ms: i64,
    ) -> AuthError {
        warn!(
            user_id = %token.user_id,
            family_id = %token.family_id,
            ip = %context.ip,
            fingerprint = %context.fingerprint,
            elapsed_ms,
            "refresh token reuse outside retry window, revoking family"
        );
        if let Err(err) = self
            .store
            .revoke_family(token.family_id, REASON_FAMILY_REUSE)
            .await
        {
            // Deny the caller regardless; the next replay retries the write.
            error!(family_id = %token.family_id, "family revocation failed: {err:#}");
        }
        AuthError::ReuseDetected {
            severity: ReuseSeverity::Low,
        }
    }

    async fn burn_device(
        &self,
        token: &RefreshToken,
        context: &ClientContext,
        elapsed_ms: i64,
    ) -> AuthError {
        error!(
            user_id = %token.user_id,
            device_id = %token.device_id,
            family_id = %token.family_id,
            ip = %context.ip,
            fingerprint = %context.fingerprint,
            elapsed_ms,
            "refresh token reuse from different client context, revoking device"
        );
        if let Err(err) = self
            .store
            .revoke_device(token.user_id, token.device_id, REASON_DEVICE_REUSE)
            .await
        {
            error!(device_id = %token.device_id, "device revocation failed: {err:#}");
        }
        self.alerts.notify(&SecurityAlert::TokenReuse {
            severity: ReuseSeverity::High,
            user_id: token.user_id,
            device_id: token.device_id,
            family_id: token.family_id,
            ip: context.ip.clone(),
        });
        AuthError::ReuseDetected {
            severity: ReuseSeverity::High,
        }
    }
}

fn internal(err: anyhow::Error) -> AuthError {
    error!("token store failure: {err:#}");
    AuthError::Unknown
}
