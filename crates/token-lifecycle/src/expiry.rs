//! Expiry and proactive-refresh arithmetic
//!
//! Pure functions over timestamps. Nothing here touches storage or the
//! clock; callers pass `now` so the rules are deterministic under test.

use chrono::{DateTime, TimeDelta, Utc};

use crate::constants::DEFAULT_REFRESH_THRESHOLD_SECS;

/// Whether a token expiring at `expires_at` is already dead at `now`.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at <= now
}

/// Whether a token should be renewed before use.
///
/// True once the remaining lifetime is at or below `threshold`, which
/// includes every expired token.
pub fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
    expires_at - now <= threshold
}

/// Refresh threshold bound to the expiry rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    threshold: TimeDelta,
}

impl ExpiryPolicy {
    /// Policy with a custom threshold. Negative thresholds are clamped to zero.
    pub fn new(threshold: TimeDelta) -> Self {
        Self {
            threshold: threshold.max(TimeDelta::zero()),
        }
    }

    /// The proactive refresh window.
    pub fn threshold(&self) -> TimeDelta {
        self.threshold
    }

    pub fn is_expired(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        is_expired(expires_at, now)
    }

    pub fn needs_refresh(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        needs_refresh(expires_at, now, self.threshold)
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_REFRESH_THRESHOLD_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn past_expiry_is_expired() {
        let now = now();
        for secs in [1, 60, 3600, 86_400 * 365] {
            assert!(is_expired(now - TimeDelta::seconds(secs), now), "{secs}s ago");
        }
    }

    #[test]
    fn expiry_at_now_is_expired() {
        let now = now();
        assert!(is_expired(now, now));
    }

    #[test]
    fn future_expiry_is_not_expired() {
        let now = now();
        assert!(!is_expired(now + TimeDelta::milliseconds(1), now));
        assert!(!is_expired(now + TimeDelta::hours(1), now));
    }

    #[test]
    fn within_threshold_needs_refresh() {
        let now = now();
        let threshold = TimeDelta::minutes(5);
        assert!(needs_refresh(now + TimeDelta::minutes(4), now, threshold));
        assert!(needs_refresh(now + TimeDelta::seconds(1), now, threshold));
    }

    #[test]
    fn exactly_at_threshold_needs_refresh() {
        let now = now();
        let threshold = TimeDelta::minutes(5);
        assert!(needs_refresh(now + threshold, now, threshold));
    }

    #[test]
    fn beyond_threshold_does_not_need_refresh() {
        let now = now();
        let threshold = TimeDelta::minutes(5);
        assert!(!needs_refresh(
            now + threshold + TimeDelta::seconds(1),
            now,
            threshold
        ));
        assert!(!needs_refresh(now + TimeDelta::hours(1), now, threshold));
    }

    #[test]
    fn expired_tokens_always_need_refresh() {
        let now = now();
        assert!(needs_refresh(
            now - TimeDelta::seconds(60),
            now,
            TimeDelta::zero()
        ));
    }

    #[test]
    fn default_policy_uses_five_minutes() {
        let policy = ExpiryPolicy::default();
        assert_eq!(policy.threshold(), TimeDelta::minutes(5));

        let now = now();
        assert!(policy.needs_refresh(now + TimeDelta::minutes(5), now));
        assert!(!policy.needs_refresh(now + TimeDelta::minutes(6), now));
        assert!(!policy.is_expired(now + TimeDelta::minutes(1), now));
    }

    #[test]
    fn negative_threshold_is_clamped() {
        let policy = ExpiryPolicy::new(TimeDelta::seconds(-30));
        assert_eq!(policy.threshold(), TimeDelta::zero());
    }
}
