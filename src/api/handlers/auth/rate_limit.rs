//! Rate limiting primitives for auth flows.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

const WINDOW_SECONDS: u64 = 60;

#[derive(Clone, Copy, Debug)]
pub enum RateLimitAction {
    Login,
    Refresh,
}

impl RateLimitAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_username(&self, username: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_username(&self, _username: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// In-memory fixed-cap limiter over a sliding one minute window, keyed by
/// action plus caller identity. Single instance only.
pub struct SlidingWindowRateLimiter {
    max_per_window: u32,
    window: Duration,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SlidingWindowRateLimiter {
    #[must_use]
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_window: max_per_minute.max(1),
            window: Duration::from_secs(WINDOW_SECONDS),
            hits: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    fn check(&self, key: String) -> RateLimitDecision {
        let now = Instant::now();
        let Ok(mut hits) = self.hits.lock() else {
            // A poisoned lock means a panic elsewhere; do not lock callers out.
            warn!("rate limiter lock poisoned");
            return RateLimitDecision::Allowed;
        };

        let entry = hits.entry(key).or_default();
        entry.retain(|hit| now.duration_since(*hit) < self.window);
        if entry.len() >= self.max_per_window as usize {
            return RateLimitDecision::Limited;
        }
        entry.push(now);
        RateLimitDecision::Allowed
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };
        self.check(format!("{}:ip:{ip}", action.as_str()))
    }

    fn check_username(&self, username: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(format!("{}:user:{username}", action.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(Some("192.0.2.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_username("mana", RateLimitAction::Refresh),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn window_caps_repeated_hits() {
        let limiter = SlidingWindowRateLimiter::new(3);
        for _ in 0..3 {
            assert_eq!(
                limiter.check_ip(Some("192.0.2.1"), RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_ip(Some("192.0.2.1"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowRateLimiter::new(1);
        assert_eq!(
            limiter.check_ip(Some("192.0.2.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        // Different IP, different action and username keys stay open.
        assert_eq!(
            limiter.check_ip(Some("203.0.113.9"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("192.0.2.1"), RateLimitAction::Refresh),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_username("mana", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn hits_expire_with_the_window() {
        let limiter = SlidingWindowRateLimiter::new(1).with_window(Duration::from_secs(0));
        assert_eq!(
            limiter.check_ip(Some("192.0.2.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("192.0.2.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn missing_ip_is_not_limited() {
        let limiter = SlidingWindowRateLimiter::new(1);
        for _ in 0..3 {
            assert_eq!(
                limiter.check_ip(None, RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
    }
}
