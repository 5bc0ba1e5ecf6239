//! Classification of superseded-token presentations.
//!
//! When a refresh token that has already been rotated shows up again, it is
//! either a client retrying a rotation whose response got lost, or someone
//! replaying a stolen token. The distinction is made from three facts only:
//! how long ago the token was superseded, whether the caller's IP matches the
//! one recorded at rotation time, and whether the device fingerprint matches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Retry window in milliseconds. A superseded token presented from the same
/// IP and fingerprint within this window is treated as a lost-response retry.
pub const DEFAULT_RETRY_WINDOW_MS: i64 = 1_000;

/// Severity attached to a non-benign reuse verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReuseSeverity {
    /// Same client context, but too late to be a retry. The family is burned.
    Low,
    /// Different client context. The whole device is burned.
    High,
}

impl fmt::Display for ReuseSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::High => f.write_str("high"),
        }
    }
}

/// What to do about a superseded token being presented again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseVerdict {
    /// Benign retry: hand back the successor that was already issued.
    ReplaySuccessor,
    /// Revoke every token in the presented token's family.
    RevokeFamily,
    /// Revoke every token issued to the presented token's device.
    RevokeDevice,
}

impl ReuseVerdict {
    /// Severity of the verdict; `None` for the benign branch.
    #[must_use]
    pub fn severity(self) -> Option<ReuseSeverity> {
        match self {
            Self::ReplaySuccessor => None,
            Self::RevokeFamily => Some(ReuseSeverity::Low),
            Self::RevokeDevice => Some(ReuseSeverity::High),
        }
    }
}

/// Classify a superseded-token presentation.
///
/// Checks run in priority order: a mismatched IP or fingerprint always wins
/// over timing. `elapsed_ms` is the time since the token was superseded;
/// negative values (clock skew between app servers) count as inside the
/// window.
#[must_use]
pub fn classify_reuse(
    elapsed_ms: i64,
    retry_window_ms: i64,
    same_ip: bool,
    same_fingerprint: bool,
) -> ReuseVerdict {
    if !same_ip {
        return ReuseVerdict::RevokeDevice;
    }
    if !same_fingerprint {
        return ReuseVerdict::RevokeDevice;
    }
    if elapsed_ms <= retry_window_ms {
        ReuseVerdict::ReplaySuccessor
    } else {
        ReuseVerdict::RevokeFamily
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_retry_same_context_is_benign() {
        let verdict = classify_reuse(500, DEFAULT_RETRY_WINDOW_MS, true, true);
        assert_eq!(verdict, ReuseVerdict::ReplaySuccessor);
        assert_eq!(verdict.severity(), None);
    }

    #[test]
    fn slow_reuse_same_context_burns_family() {
        let verdict = classify_reuse(1_500, DEFAULT_RETRY_WINDOW_MS, true, true);
        assert_eq!(verdict, ReuseVerdict::RevokeFamily);
        assert_eq!(verdict.severity(), Some(ReuseSeverity::Low));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        assert_eq!(
            classify_reuse(1_000, DEFAULT_RETRY_WINDOW_MS, true, true),
            ReuseVerdict::ReplaySuccessor
        );
        assert_eq!(
            classify_reuse(1_001, DEFAULT_RETRY_WINDOW_MS, true, true),
            ReuseVerdict::RevokeFamily
        );
    }

    #[test]
    fn ip_mismatch_burns_device_even_inside_window() {
        let verdict = classify_reuse(10, DEFAULT_RETRY_WINDOW_MS, false, true);
        assert_eq!(verdict, ReuseVerdict::RevokeDevice);
        assert_eq!(verdict.severity(), Some(ReuseSeverity::High));
    }

    #[test]
    fn fingerprint_mismatch_burns_device_even_inside_window() {
        let verdict = classify_reuse(10, DEFAULT_RETRY_WINDOW_MS, true, false);
        assert_eq!(verdict, ReuseVerdict::RevokeDevice);
    }

    #[test]
    fn both_mismatched_burns_device() {
        assert_eq!(
            classify_reuse(5_000, DEFAULT_RETRY_WINDOW_MS, false, false),
            ReuseVerdict::RevokeDevice
        );
    }

    #[test]
    fn negative_elapsed_counts_as_retry() {
        // App-server clocks can disagree by a few milliseconds.
        assert_eq!(
            classify_reuse(-20, DEFAULT_RETRY_WINDOW_MS, true, true),
            ReuseVerdict::ReplaySuccessor
        );
    }

    #[test]
    fn custom_window_is_honored() {
        assert_eq!(classify_reuse(300, 250, true, true), ReuseVerdict::RevokeFamily);
        assert_eq!(classify_reuse(200, 250, true, true), ReuseVerdict::ReplaySuccessor);
    }

    #[test]
    fn severity_formats_lowercase() {
        assert_eq!(ReuseSeverity::Low.to_string(), "low");
        assert_eq!(ReuseSeverity::High.to_string(), "high");
    }
}
