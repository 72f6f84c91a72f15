//! Token bucket admission control for outbound calls.
//!
//! Tokens accrue at `requests_per_second` up to `burst_capacity`. Each admitted
//! call spends one token. Callers that find the bucket empty wait for exactly
//! the deficit to refill.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use super::RateLimitConfig;

/// Tolerance for float drift when a waiter wakes up exactly on time.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    /// Current available tokens, `0 <= tokens <= capacity`.
    tokens: f64,
    /// Accrual starts here. May lie in the future after [`TokenBucketLimiter::defer_until`].
    last_refill: Instant,
}

impl TokenBucketState {
    fn refilled(&self, now: Instant, rate: f64, capacity: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        (self.tokens + elapsed.as_secs_f64() * rate).min(capacity)
    }

    /// Saturates at `Duration::MAX` for rates too slow to express.
    fn wait_for_token(&self, now: Instant, available: f64, rate: f64) -> Duration {
        let blocked = self.last_refill.saturating_duration_since(now);
        let deficit = (1.0 - available).max(0.0);
        let refill = Duration::try_from_secs_f64(deficit / rate).unwrap_or(Duration::MAX);
        blocked.saturating_add(refill)
    }
}

/// Point-in-time view of a limiter, for diagnostics.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RateLimitStatus {
    pub available_tokens: f64,
    pub burst_capacity: u32,
    pub requests_per_second: f64,
    /// True while an upstream retry-after hint is holding admission closed.
    pub deferred: bool,
}

/// Token bucket rate limiter.
///
/// The refill-and-deduct step runs under one short critical section, so
/// concurrent callers can never spend the same token twice or drive the
/// count negative. Callers that have to wait queue on a separate async lock
/// and hold it while sleeping. The next waiter therefore computes its delay
/// only after the previous one was admitted. Waiters are not guaranteed
/// FIFO order.
///
/// State is committed only when a token is actually deducted. Dropping a
/// suspended [`acquire`](Self::acquire) leaves the bucket untouched.
///
/// # Example
///
/// ```rust
/// use devops_pacer::core::TokenBucketLimiter;
///
/// # #[tokio::main]
/// # async fn main() {
/// let limiter = TokenBucketLimiter::new(5.0, 2);
/// limiter.acquire().await;
/// limiter.acquire().await;
/// assert!(!limiter.try_acquire());
/// # }
/// ```
#[derive(Debug)]
pub struct TokenBucketLimiter {
    rate: f64,
    capacity: u32,
    state: Mutex<TokenBucketState>,
    waiters: tokio::sync::Mutex<()>,
}

impl TokenBucketLimiter {
    /// Creates a full bucket.
    ///
    /// `requests_per_second` and `burst_capacity` are expected to be
    /// validated already; see [`RateLimitConfig::new`].
    pub fn new(requests_per_second: f64, burst_capacity: u32) -> Self {
        Self {
            rate: requests_per_second,
            capacity: burst_capacity,
            state: Mutex::new(TokenBucketState {
                tokens: f64::from(burst_capacity),
                last_refill: Instant::now(),
            }),
            waiters: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second(), config.burst_capacity())
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenBucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refills and, when at least one token is available, deducts it.
    ///
    /// Returns `Ok(())` on admission or `Err(wait)` with the time until a
    /// token would be available. The bucket is left unchanged on `Err`.
    fn try_take(&self, now: Instant) -> Result<(), Duration> {
        let mut state = self.lock_state();
        let available = state.refilled(now, self.rate, f64::from(self.capacity));

        if available + TOKEN_EPSILON >= 1.0 {
            state.tokens = (available - 1.0).max(0.0);
            state.last_refill = state.last_refill.max(now);
            Ok(())
        } else {
            Err(state.wait_for_token(now, available, self.rate))
        }
    }

    /// Waits until a token is available, then spends it.
    ///
    /// Never fails. Cancel-safe: dropping the future while it waits consumes
    /// nothing.
    pub async fn acquire(&self) {
        if self.try_take(Instant::now()).is_ok() {
            return;
        }

        let _turn = self.waiters.lock().await;
        loop {
            match self.try_take(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for token");
                    sleep(wait).await;
                }
            }
        }
    }

    /// Spends a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.try_take(Instant::now()).is_ok()
    }

    /// Time until the next token becomes available; zero if one is available now.
    pub fn time_until_available(&self) -> Duration {
        let now = Instant::now();
        let state = self.lock_state();
        let available = state.refilled(now, self.rate, f64::from(self.capacity));
        if available + TOKEN_EPSILON >= 1.0 {
            Duration::ZERO
        } else {
            state.wait_for_token(now, available, self.rate)
        }
    }

    /// Tokens that would be available if a caller arrived now.
    pub fn available_tokens(&self) -> f64 {
        let state = self.lock_state();
        state.refilled(Instant::now(), self.rate, f64::from(self.capacity))
    }

    /// Drains the bucket and keeps it closed until `until`.
    ///
    /// Used when the upstream answers with an explicit retry-after hint, so
    /// every caller sharing this limiter backs off rather than just the one
    /// that was throttled. An earlier deadline never shortens a later one.
    pub fn defer_until(&self, until: Instant) {
        let mut state = self.lock_state();
        state.tokens = 0.0;
        state.last_refill = state.last_refill.max(until);
        debug!(
            blocked_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
            "rate limiter deferred by upstream hint"
        );
    }

    pub fn snapshot(&self) -> RateLimitStatus {
        let now = Instant::now();
        let state = self.lock_state();
        RateLimitStatus {
            available_tokens: state.refilled(now, self.rate, f64::from(self.capacity)),
            burst_capacity: self.capacity,
            requests_per_second: self.rate,
            deferred: state.last_refill > now,
        }
    }

    pub fn requests_per_second(&self) -> f64 {
        self.rate
    }

    pub fn burst_capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Timer deadlines round up to the next millisecond tick.
    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed <= expected + Duration::from_millis(5),
            "expected ~{expected:?}, got {elapsed:?}"
        );
    }

    /// # Burst Admitted Without Waiting
    ///
    /// Verifies that up to `burst_capacity` calls are admitted immediately.
    ///
    /// ## Test Scenario
    /// - Creates a bucket with capacity 5
    /// - Acquires 5 tokens on a paused clock
    ///
    /// ## Expected Outcome
    /// - No virtual time passes
    /// - The 6th acquisition waits exactly one refill interval
    #[tokio::test(start_paused = true)]
    async fn test_burst_then_block() {
        let limiter = TokenBucketLimiter::new(5.0, 5);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.time_until_available(), Duration::from_millis(200));

        limiter.acquire().await;
        assert_elapsed(start, Duration::from_millis(200));
    }

    /// # Extremely Slow Rate
    ///
    /// Verifies a rate whose refill interval exceeds `Duration` saturates
    /// instead of failing.
    ///
    /// ## Test Scenario
    /// - A 1e-20 requests/second bucket of capacity 1, validated by `RateLimitConfig`
    /// - The single token is spent
    ///
    /// ## Expected Outcome
    /// - `time_until_available` reports `Duration::MAX`
    /// - `try_acquire` refuses and `acquire` stays pending
    #[tokio::test(start_paused = true)]
    async fn test_extremely_slow_rate_saturates() {
        let config = RateLimitConfig::new(1e-20, 1, 0, 2.0).unwrap();
        let limiter = TokenBucketLimiter::from_config(&config);
        assert!(limiter.try_acquire());

        assert_eq!(limiter.time_until_available(), Duration::MAX);
        assert!(!limiter.try_acquire());
        let pending = tokio::time::timeout(Duration::from_secs(3600), limiter.acquire()).await;
        assert!(pending.is_err());
        assert!(limiter.available_tokens() < 1.0);
    }

    /// # Refill Capped At Capacity
    ///
    /// Verifies that idle time never accrues more than `burst_capacity` tokens.
    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let limiter = TokenBucketLimiter::new(10.0, 3);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available_tokens(), 3.0);

        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    /// # Partial Refill
    ///
    /// Verifies fractional accrual and the computed wait for the deficit.
    ///
    /// ## Test Scenario
    /// - Empties a 2 rps bucket, then advances 250ms
    ///
    /// ## Expected Outcome
    /// - Half a token is available
    /// - The remaining wait is 250ms
    #[tokio::test(start_paused = true)]
    async fn test_partial_refill_wait() {
        let limiter = TokenBucketLimiter::new(2.0, 1);
        assert!(limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!((limiter.available_tokens() - 0.5).abs() < 1e-9);
        assert_eq!(limiter.time_until_available(), Duration::from_millis(250));
    }

    /// # Cancelled Acquire Leaves Bucket Unchanged
    ///
    /// Verifies that dropping a suspended acquire spends nothing.
    ///
    /// ## Test Scenario
    /// - Empties the bucket
    /// - Starts an acquire and cancels it with a timeout shorter than the wait
    ///
    /// ## Expected Outcome
    /// - The timeout fires
    /// - The token count afterwards equals plain refill, with nothing deducted
    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_spends_nothing() {
        let limiter = TokenBucketLimiter::new(1.0, 1);
        assert!(limiter.try_acquire());
        assert_eq!(limiter.available_tokens(), 0.0);

        let result =
            tokio::time::timeout(Duration::from_millis(400), limiter.acquire()).await;
        assert!(result.is_err());

        assert!((limiter.available_tokens() - 0.4).abs() < 0.01);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.try_acquire());
    }

    /// # Upstream Deferral
    ///
    /// Verifies that a retry-after deferral drains the bucket and blocks admission.
    #[tokio::test(start_paused = true)]
    async fn test_defer_until_blocks_admission() {
        let limiter = TokenBucketLimiter::new(10.0, 10);
        limiter.defer_until(Instant::now() + Duration::from_secs(2));

        let status = limiter.snapshot();
        assert!(status.deferred);
        assert_eq!(status.available_tokens, 0.0);
        assert!(!limiter.try_acquire());
        assert_eq!(
            limiter.time_until_available(),
            Duration::from_secs(2) + Duration::from_millis(100)
        );

        let start = Instant::now();
        limiter.acquire().await;
        assert_elapsed(start, Duration::from_millis(2100));
        assert!(!limiter.snapshot().deferred);
    }

    /// # Concurrent Callers Share The Rate
    ///
    /// Verifies admission under contention from many tasks.
    ///
    /// ## Test Scenario
    /// - 20 tasks acquire from a bucket of capacity 5 at 5 rps
    ///
    /// ## Expected Outcome
    /// - The last admission happens after (20 - 5) / 5 = 3 seconds
    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_respects_rate() {
        let limiter = Arc::new(TokenBucketLimiter::new(5.0, 5));
        let start = Instant::now();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut admitted = Vec::new();
        for task in tasks {
            admitted.push(task.await.unwrap());
        }
        admitted.sort();

        assert_eq!(admitted[4].duration_since(start), Duration::ZERO);
        let last = admitted[19].duration_since(start);
        assert!(last >= Duration::from_millis(2990), "last admission at {last:?}");
        assert!(last <= Duration::from_millis(3100), "last admission at {last:?}");
    }
}
