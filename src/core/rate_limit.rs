//! Immutable rate-limit and retry configuration shared by the limiter,
//! the backoff policy and the executor.

use std::time::Duration;

use crate::error::ConfigError;

/// Rate limiting and retry configuration.
///
/// Built once at client construction and never mutated. All constructors
/// validate their inputs, so a `RateLimitConfig` in hand is always usable.
///
/// # Example
///
/// ```rust
/// use devops_pacer::core::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::new(5.0, 10, 3, 2.0)
///     .unwrap()
///     .with_jitter(false)
///     .with_max_delay(Some(Duration::from_secs(30)));
/// assert_eq!(config.burst_capacity(), 10);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    requests_per_second: f64,
    burst_capacity: u32,
    max_retries: u32,
    backoff_factor: f64,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_capacity: 50,
            max_retries: 3,
            backoff_factor: 2.0,
            base_delay: Duration::from_secs(1),
            max_delay: None,
            jitter: true,
        }
    }
}

impl RateLimitConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when `requests_per_second` is not a
    /// finite positive number, `burst_capacity` is zero, or `backoff_factor`
    /// is below 1.
    pub fn new(
        requests_per_second: f64,
        burst_capacity: u32,
        max_retries: u32,
        backoff_factor: f64,
    ) -> Result<Self, ConfigError> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(ConfigError::invalid(
                "requests_per_second",
                format!("must be a finite number greater than 0, got {requests_per_second}"),
            ));
        }
        if burst_capacity == 0 {
            return Err(ConfigError::invalid(
                "burst_capacity",
                "must be at least 1",
            ));
        }
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "backoff_factor",
                format!("must be a finite number of at least 1, got {backoff_factor}"),
            ));
        }

        Ok(Self {
            requests_per_second,
            burst_capacity,
            max_retries,
            backoff_factor,
            ..Self::default()
        })
    }

    /// Sets the delay unit multiplied by `backoff_factor ** attempt`.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Caps computed backoff delays. Server retry-after hints are not capped.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Enables or disables ±20% jitter on computed backoff delays.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }

    pub fn burst_capacity(&self) -> u32 {
        self.burst_capacity
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }
}
