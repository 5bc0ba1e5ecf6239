//! Operator alerting for security events.
//!
//! High-severity token reuse and account lockouts are worth a page, not just
//! a log line. The [`AlertSink`] trait is the seam where a pager, chat or
//! email integration plugs in; the default [`LogAlertSink`] keeps everything
//! in the structured logs, which is enough for local and single-node runs.

use crate::tokens::reuse::ReuseSeverity;
use tracing::{error, warn};
use uuid::Uuid;

/// A security event that should reach an operator.
#[derive(Debug, Clone)]
pub enum SecurityAlert {
    /// A superseded refresh token was replayed.
    TokenReuse {
        severity: ReuseSeverity,
        user_id: Uuid,
        device_id: Uuid,
        family_id: Uuid,
        ip: String,
    },
    /// An account hit the failed-login threshold and was deactivated.
    AccountLockout {
        user_id: Uuid,
        username: String,
        failed_count: i32,
    },
}

/// Delivery abstraction for security alerts.
///
/// Implementations must not block the request path; anything slower than a
/// log write should enqueue and return.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &SecurityAlert);
}

/// Default sink: structured log records at a severity-appropriate level.
#[derive(Clone, Debug)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, alert: &SecurityAlert) {
        match alert {
            SecurityAlert::TokenReuse {
                severity,
                user_id,
                device_id,
                family_id,
                ip,
            } => match severity {
                ReuseSeverity::High => error!(
                    %user_id,
                    %device_id,
                    %family_id,
                    ip = %ip,
                    "refresh token reuse from a different client context"
                ),
                ReuseSeverity::Low => warn!(
                    %user_id,
                    %device_id,
                    %family_id,
                    ip = %ip,
                    "refresh token reuse outside the retry window"
                ),
            },
            SecurityAlert::AccountLockout {
                user_id,
                username,
                failed_count,
            } => warn!(
                %user_id,
                username = %username,
                failed_count,
                "account deactivated after repeated failed logins"
            ),
        }
    }
}
