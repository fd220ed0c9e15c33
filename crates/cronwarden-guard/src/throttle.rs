//! Login throttle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use cronwarden_config::AntiBruteForceConfig;
use cronwarden_storage::CronwardenStorage;
use cronwarden_types::{LoginAttempt, LoginStatus};

use crate::GuardError;
use crate::origin::OriginFailures;

pub const DEFAULT_MAX_USERNAME_FAILURES: u32 = 5;
pub const DEFAULT_MAX_ORIGIN_FAILURES: u32 = 10;

/// Trailing window for the per-username count, in seconds.
pub const USERNAME_WINDOW_SECS: i64 = 60 * 60;

/// Failure thresholds. A count equal to the limit already denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleLimits {
    pub max_username_failures: u32,
    pub max_origin_failures: u32,
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self {
            max_username_failures: DEFAULT_MAX_USERNAME_FAILURES,
            max_origin_failures: DEFAULT_MAX_ORIGIN_FAILURES,
        }
    }
}

impl ThrottleLimits {
    /// Resolve limits from the `AntiBruteForce` config section. A missing
    /// section is not fatal: defaults apply and a warning is logged.
    pub fn from_config(section: Option<&AntiBruteForceConfig>) -> Self {
        let Some(section) = section else {
            warn!("AntiBruteForce settings are missing, using default limits");
            return Self::default();
        };
        Self {
            max_username_failures: section
                .max_username_failed_attempts
                .unwrap_or(DEFAULT_MAX_USERNAME_FAILURES),
            max_origin_failures: section
                .max_ip_failed_attempts
                .unwrap_or(DEFAULT_MAX_ORIGIN_FAILURES),
        }
    }
}

/// Decides whether a login attempt may proceed.
pub struct LoginThrottle {
    storage: Arc<CronwardenStorage>,
    origins: Arc<OriginFailures>,
    limits: ThrottleLimits,
    retention: usize,
}

impl LoginThrottle {
    pub fn new(
        storage: Arc<CronwardenStorage>,
        origins: Arc<OriginFailures>,
        limits: ThrottleLimits,
        retention: usize,
    ) -> Self {
        Self {
            storage,
            origins,
            limits,
            retention,
        }
    }

    pub fn limits(&self) -> ThrottleLimits {
        self.limits
    }

    pub fn origins(&self) -> &Arc<OriginFailures> {
        &self.origins
    }

    /// Whether `username` may try to log in from `origin` right now.
    pub async fn is_allowed(&self, username: &str, origin: Option<&str>) -> Result<bool, GuardError> {
        self.is_allowed_at(username, origin, Utc::now()).await
    }

    async fn is_allowed_at(
        &self,
        username: &str,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, GuardError> {
        let failures = self
            .storage
            .count_failed_logins_since(username, now - Duration::seconds(USERNAME_WINDOW_SECS))
            .await?;
        if failures >= self.limits.max_username_failures {
            warn!(username, failures, "Login denied: too many failures for user");
            return Ok(false);
        }

        if let Some(origin) = origin {
            let failures = self.origins.count(origin);
            if failures >= self.limits.max_origin_failures {
                warn!(origin, failures, "Login denied: too many failures from origin");
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn increment_origin_failure(&self, origin: &str) -> u32 {
        let count = self.origins.increment(origin);
        debug!(origin, count, "Origin failure recorded");
        count
    }

    pub fn reset_origin_failure(&self, origin: &str) {
        if self.origins.reset(origin) {
            debug!(origin, "Origin failures reset");
        }
    }

    /// Log an attempt and adjust the origin counter: a failure increments
    /// it, a success clears it.
    pub async fn record_attempt(
        &self,
        username: &str,
        origin: Option<&str>,
        status: LoginStatus,
    ) -> Result<LoginAttempt, GuardError> {
        let attempt = self
            .storage
            .record_login(username, status, Utc::now(), origin, self.retention)
            .await?;

        if let Some(origin) = origin {
            match status {
                LoginStatus::Failure => {
                    self.increment_origin_failure(origin);
                }
                LoginStatus::Success => self.reset_origin_failure(origin),
            }
        }
        info!(username, origin = origin.unwrap_or("-"), %status, "Login attempt recorded");
        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(limits: ThrottleLimits) -> LoginThrottle {
        let storage = Arc::new(CronwardenStorage::open_in_memory().unwrap());
        LoginThrottle::new(storage, Arc::new(OriginFailures::new()), limits, 1000)
    }

    async fn fail_at(throttle: &LoginThrottle, username: &str, at: DateTime<Utc>) {
        throttle
            .storage
            .record_login(username, LoginStatus::Failure, at, None, 1000)
            .await
            .unwrap();
    }

    #[test]
    fn test_limits_from_config() {
        assert_eq!(ThrottleLimits::from_config(None), ThrottleLimits::default());

        let partial = AntiBruteForceConfig {
            max_username_failed_attempts: Some(3),
            max_ip_failed_attempts: None,
        };
        let limits = ThrottleLimits::from_config(Some(&partial));
        assert_eq!(limits.max_username_failures, 3);
        assert_eq!(limits.max_origin_failures, DEFAULT_MAX_ORIGIN_FAILURES);
    }

    #[tokio::test]
    async fn test_five_recent_failures_deny_username() {
        let throttle = throttle(ThrottleLimits::default());
        let now = Utc::now();
        for minutes in [1, 10, 20, 30, 59] {
            fail_at(&throttle, "alice", now - Duration::minutes(minutes)).await;
        }

        assert!(!throttle.is_allowed_at("alice", Some("9.9.9.9"), now).await.unwrap());
        assert!(!throttle.is_allowed_at("alice", None, now).await.unwrap());
        assert!(throttle.is_allowed_at("bob", Some("9.9.9.9"), now).await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_older_than_an_hour_does_not_count() {
        let throttle = throttle(ThrottleLimits::default());
        let now = Utc::now();
        for minutes in [1, 10, 20, 30] {
            fail_at(&throttle, "alice", now - Duration::minutes(minutes)).await;
        }
        fail_at(&throttle, "alice", now - Duration::minutes(61)).await;

        assert!(throttle.is_allowed_at("alice", None, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_successes_do_not_count() {
        let throttle = throttle(ThrottleLimits::default());
        for _ in 0..6 {
            throttle
                .record_attempt("alice", None, LoginStatus::Success)
                .await
                .unwrap();
        }
        assert!(throttle.is_allowed("alice", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_origin_threshold_and_reset() {
        let throttle = throttle(ThrottleLimits::default());
        for _ in 0..9 {
            throttle.increment_origin_failure("1.2.3.4");
        }
        assert!(throttle.is_allowed("anyone", Some("1.2.3.4")).await.unwrap());

        throttle.increment_origin_failure("1.2.3.4");
        assert!(!throttle.is_allowed("anyone", Some("1.2.3.4")).await.unwrap());
        assert!(throttle.is_allowed("anyone", Some("4.3.2.1")).await.unwrap());

        throttle.reset_origin_failure("1.2.3.4");
        assert!(throttle.is_allowed("anyone", Some("1.2.3.4")).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_attempt_adjusts_origin() {
        let throttle = throttle(ThrottleLimits {
            max_username_failures: 100,
            max_origin_failures: 2,
        });

        throttle
            .record_attempt("alice", Some("1.2.3.4"), LoginStatus::Failure)
            .await
            .unwrap();
        throttle
            .record_attempt("bob", Some("1.2.3.4"), LoginStatus::Failure)
            .await
            .unwrap();
        assert_eq!(throttle.origins().count("1.2.3.4"), 2);
        assert!(!throttle.is_allowed("carol", Some("1.2.3.4")).await.unwrap());

        let attempt = throttle
            .record_attempt("carol", Some("1.2.3.4"), LoginStatus::Success)
            .await
            .unwrap();
        assert_eq!(attempt.origin.as_deref(), Some("1.2.3.4"));
        assert_eq!(throttle.origins().count("1.2.3.4"), 0);
        assert!(throttle.is_allowed("carol", Some("1.2.3.4")).await.unwrap());

        let logged = throttle.storage.list_login_attempts(10).await.unwrap();
        assert_eq!(logged.len(), 3);
    }
}
