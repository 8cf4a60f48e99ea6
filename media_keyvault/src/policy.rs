//! Unlock policy: password rules and failed-attempt lockout

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KeyVaultError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockPolicy {
    /// Failed attempts before a lockout starts
    pub max_failed_attempts: u32,
    /// Lockout length (seconds)
    pub lockout_seconds: u64,
    /// Minimum password length (characters)
    pub min_password_length: usize,
    /// Require at least one digit
    pub require_digit: bool,
}

impl Default for UnlockPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_seconds: 300,
            min_password_length: 8,
            require_digit: true,
        }
    }
}

impl UnlockPolicy {
    pub fn high_security() -> Self {
        Self {
            max_failed_attempts: 3,
            lockout_seconds: 900,
            min_password_length: 16,
            require_digit: true,
        }
    }

    /// Check a new password against the policy.
    pub fn validate_password(&self, password: &str) -> Result<()> {
        let mut errors = Vec::new();

        if password.chars().count() < self.min_password_length {
            errors.push(format!(
                "Password must be at least {} characters",
                self.min_password_length
            ));
        }

        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain at least one digit".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KeyVaultError::WeakPassword(errors))
        }
    }
}

/// Failed-attempt counter. In memory only; a restart resets it.
#[derive(Debug, Clone, Default)]
pub struct AttemptLimiter {
    failed_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
}

impl AttemptLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `RateLimitExceeded` while a lockout is active.
    pub fn check(&self, now: DateTime<Utc>) -> Result<()> {
        match self.locked_until {
            Some(until) if now < until => Err(KeyVaultError::RateLimitExceeded {
                retry_after_secs: (until - now).num_seconds().max(1) as u64,
            }),
            _ => Ok(()),
        }
    }

    /// Returns true when this failure started a lockout.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &UnlockPolicy) -> bool {
        if matches!(self.locked_until, Some(until) if now >= until) {
            self.locked_until = None;
            self.failed_attempts = 0;
        }

        self.failed_attempts += 1;
        if self.failed_attempts >= policy.max_failed_attempts {
            self.locked_until = Some(now + Duration::seconds(policy.lockout_seconds as i64));
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        self.failed_attempts = 0;
        self.locked_until = None;
    }

    pub fn remaining_attempts(&self, policy: &UnlockPolicy) -> u32 {
        policy.max_failed_attempts.saturating_sub(self.failed_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_validation() {
        let policy = UnlockPolicy::default();
        assert!(policy.validate_password("abc").is_err());
        assert!(policy.validate_password("abcdefgh").is_err());
        assert!(policy.validate_password("abcdefgh1").is_ok());
    }

    #[test]
    fn test_lockout_and_expiry() {
        let policy = UnlockPolicy {
            max_failed_attempts: 3,
            lockout_seconds: 60,
            ..Default::default()
        };
        let mut limiter = AttemptLimiter::new();
        let t0 = Utc::now();

        assert!(!limiter.record_failure(t0, &policy));
        assert!(!limiter.record_failure(t0, &policy));
        assert_eq!(limiter.remaining_attempts(&policy), 1);
        assert!(limiter.record_failure(t0, &policy));

        assert!(matches!(
            limiter.check(t0 + Duration::seconds(10)),
            Err(KeyVaultError::RateLimitExceeded { .. })
        ));
        assert!(limiter.check(t0 + Duration::seconds(61)).is_ok());

        // a failure after expiry starts a fresh count
        assert!(!limiter.record_failure(t0 + Duration::seconds(61), &policy));
    }

    #[test]
    fn test_success_resets() {
        let policy = UnlockPolicy::default();
        let mut limiter = AttemptLimiter::new();
        limiter.record_failure(Utc::now(), &policy);
        limiter.record_success();
        assert_eq!(limiter.remaining_attempts(&policy), policy.max_failed_attempts);
    }
}
