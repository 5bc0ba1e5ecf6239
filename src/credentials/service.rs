//! Credential verification and the failed-login lockout policy.

use crate::alerts::{AlertSink, SecurityAlert};
use crate::credentials::models::User;
use crate::credentials::password::verify_password;
use crate::credentials::repo::UserStore;
use crate::errors::AuthError;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Consecutive failures that deactivate an account.
pub const DEFAULT_LOCKOUT_THRESHOLD: i32 = 5;

/// Verifies credentials and maintains the failure counter.
///
/// Store faults are logged here and mapped to [`AuthError::Unknown`]; the
/// HTTP layer never sees infrastructure detail.
pub struct CredentialService {
    store: Arc<dyn UserStore>,
    alerts: Arc<dyn AlertSink>,
    lockout_threshold: i32,
}

impl CredentialService {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            store,
            alerts,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: i32) -> Self {
        self.lockout_threshold = threshold.max(1);
        self
    }

    /// Verify a login attempt.
    ///
    /// Order matters: an inactive account is rejected before the password is
    /// even compared, a wrong password bumps the counter (deactivating at
    /// the threshold), and a correct password resets the counter to zero.
    ///
    /// # Errors
    /// [`AuthError::AuthenticationFailed`] for unknown users and wrong
    /// passwords, [`AuthError::UserBlocked`] for inactive accounts,
    /// [`AuthError::Unknown`] for store or hash faults.
    pub async fn verify(
        &self,
        username: &str,
        organisation_id: Uuid,
        password: &str,
    ) -> Result<User, AuthError> {
        let user = self
            .store
            .find_for_login(username, organisation_id)
            .await
            .map_err(|err| {
                error!("user lookup failed: {err:#}");
                AuthError::Unknown
            })?;

        let Some(mut user) = user else {
            // No counter to bump; reply is indistinguishable from a wrong
            // password.
            return Err(AuthError::AuthenticationFailed);
        };

        if !user.active {
            warn!(user_id = %user.id, "login attempt against blocked account");
            return Err(AuthError::UserBlocked);
        }

        let matches = verify_password(password, &user.password_hash).map_err(|err| {
            error!(user_id = %user.id, "password verification failed: {err:#}");
            AuthError::Unknown
        })?;

        if !matches {
            return Err(self.register_failure(&user).await);
        }

        if user.failed_login_count != 0 {
            self.store.reset_failures(user.id).await.map_err(|err| {
                error!(user_id = %user.id, "failed to reset login failures: {err:#}");
                AuthError::Unknown
            })?;
            user.failed_login_count = 0;
        }

        info!(user_id = %user.id, "login verified");
        Ok(user)
    }

    /// Load a user for session reissue, rejecting deactivated accounts.
    ///
    /// # Errors
    /// [`AuthError::AuthenticationFailed`] when the user is gone,
    /// [`AuthError::UserBlocked`] for inactive accounts,
    /// [`AuthError::Unknown`] for store faults.
    pub async fn load_active(&self, user_id: Uuid) -> Result<User, AuthError> {
        let user = self.store.find_by_id(user_id).await.map_err(|err| {
            error!(%user_id, "user lookup failed: {err:#}");
            AuthError::Unknown
        })?;
        let Some(user) = user else {
            return Err(AuthError::AuthenticationFailed);
        };
        if !user.active {
            return Err(AuthError::UserBlocked);
        }
        Ok(user)
    }

    async fn register_failure(&self, user: &User) -> AuthError {
        match self
            .store
            .record_failure(user.id, self.lockout_threshold)
            .await
        {
            Ok(count) if count >= self.lockout_threshold => {
                self.alerts.notify(&SecurityAlert::AccountLockout {
                    user_id: user.id,
                    username: user.username.clone(),
                    failed_count: count,
                });
                // The attempt itself still failed on the password; the
                // lockout only shows on the next attempt.
                AuthError::AuthenticationFailed
            }
            Ok(count) => {
                info!(user_id = %user.id, failed_count = count, "failed login recorded");
                AuthError::AuthenticationFailed
            }
            Err(err) => {
                error!(user_id = %user.id, "failed to record login failure: {err:#}");
                AuthError::Unknown
            }
        }
    }
}
