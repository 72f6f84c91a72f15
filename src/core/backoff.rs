//! Retry eligibility and delay computation.

use std::time::Duration;

use rand::Rng;

use super::RateLimitConfig;
use crate::error::FailureKind;

/// Relative jitter applied around the nominal delay.
const JITTER_RATIO: f64 = 0.2;

/// Exponential backoff policy.
///
/// The nominal delay for attempt `n` is `base_delay * backoff_factor ** n`,
/// optionally capped by `max_delay`. With jitter enabled the returned delay is
/// drawn uniformly from ±20% around the nominal value. An explicit server
/// hint always wins and is returned unchanged.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    max_retries: u32,
    backoff_factor: f64,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter: bool,
}

impl BackoffPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_retries: config.max_retries(),
            backoff_factor: config.backoff_factor(),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter(),
        }
    }

    /// Returns false once `attempt` has reached the retry budget or when the
    /// failure is permanent.
    pub fn should_retry(&self, attempt: u32, kind: FailureKind) -> bool {
        attempt < self.max_retries && kind.is_transient()
    }

    /// Jitter-free delay for `attempt`. Non-decreasing in `attempt`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Delay before retrying after a failure at `attempt`.
    pub fn next_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        if let Some(hint) = server_hint {
            return hint;
        }

        let nominal = self.nominal_delay(attempt);
        if !self.jitter || nominal.is_zero() || nominal == Duration::MAX {
            return nominal;
        }

        let scale = rand::thread_rng().gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
        Duration::try_from_secs_f64(nominal.as_secs_f64() * scale).unwrap_or(nominal)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PermanentKind, TransientKind};

    fn policy(max_retries: u32, factor: f64, jitter: bool) -> BackoffPolicy {
        BackoffPolicy::from_config(
            &RateLimitConfig::new(10.0, 10, max_retries, factor)
                .unwrap()
                .with_jitter(jitter),
        )
    }

    /// # Retry Budget
    ///
    /// Tests that retries stop at `max_retries` and never apply to permanent failures.
    ///
    /// ## Test Scenario
    /// - Policy with max_retries = 3
    /// - Transient and permanent kinds at several attempt numbers
    ///
    /// ## Expected Outcome
    /// - Transient failures retry for attempts 0..3 only
    /// - Permanent failures never retry
    #[test]
    fn test_should_retry() {
        let policy = policy(3, 2.0, false);
        let server = FailureKind::Transient(TransientKind::ServerError);
        let not_found = FailureKind::Permanent(PermanentKind::NotFound);

        assert!(policy.should_retry(0, server));
        assert!(policy.should_retry(2, server));
        assert!(!policy.should_retry(3, server));
        assert!(!policy.should_retry(4, server));
        assert!(!policy.should_retry(0, not_found));

        let no_retries = self::policy(0, 2.0, false);
        assert!(!no_retries.should_retry(0, server));
    }

    /// # Exponential Growth
    ///
    /// Tests that the jitter-free delay equals `backoff_factor ** attempt` seconds.
    #[test]
    fn test_delay_is_factor_power() {
        let policy = policy(10, 2.0, false);
        for attempt in 0..8u32 {
            let expected = Duration::from_secs(2u64.pow(attempt));
            assert_eq!(policy.next_delay(attempt, None), expected);
        }

        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let delay = policy.nominal_delay(attempt);
            assert!(delay > previous);
            previous = delay;
        }
    }

    /// # Server Hint Precedence
    ///
    /// Tests that an explicit retry-after hint is honored exactly, even with jitter.
    #[test]
    fn test_server_hint_wins() {
        let policy = policy(3, 2.0, true);
        let hint = Duration::from_millis(7500);
        assert_eq!(policy.next_delay(0, Some(hint)), hint);
        assert_eq!(policy.next_delay(2, Some(Duration::ZERO)), Duration::ZERO);
    }

    /// # Jitter Bounds
    ///
    /// Tests that jittered delays stay within ±20% of the nominal delay.
    #[test]
    fn test_jitter_bounds() {
        let policy = policy(5, 2.0, true);
        let nominal = policy.nominal_delay(2).as_secs_f64();
        for _ in 0..200 {
            let delay = policy.next_delay(2, None).as_secs_f64();
            assert!(delay >= nominal * 0.8 - 1e-9, "{delay} below bound");
            assert!(delay <= nominal * 1.2 + 1e-9, "{delay} above bound");
        }
    }

    #[test]
    fn test_max_delay_cap_and_overflow() {
        let capped = BackoffPolicy::from_config(
            &RateLimitConfig::new(1.0, 1, 100, 3.0)
                .unwrap()
                .with_jitter(false)
                .with_max_delay(Some(Duration::from_secs(10))),
        );
        assert_eq!(capped.nominal_delay(1), Duration::from_secs(3));
        assert_eq!(capped.nominal_delay(5), Duration::from_secs(10));

        let uncapped = policy(u32::MAX, 10.0, false);
        assert_eq!(uncapped.nominal_delay(u32::MAX), Duration::MAX);
    }
}
