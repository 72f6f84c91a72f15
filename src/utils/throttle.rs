use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caps the number of operations in flight at once.
///
/// Independent of the token bucket: the bucket bounds how often requests
/// start, this bounds how many are open simultaneously.
#[derive(Clone, Debug)]
pub struct Throttler {
    /// `None` means unbounded.
    semaphore: Option<Arc<Semaphore>>,
}

impl Throttler {
    /// Create a throttler allowing `max_concurrent` operations; 0 disables the cap.
    pub fn new(max_concurrent: usize) -> Self {
        let semaphore = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self { semaphore }
    }

    /// Execute an operation once a slot is free.
    ///
    /// The slot is released when the operation completes or is dropped.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _permit = match &self.semaphore {
            // The semaphore is never closed, so acquire cannot fail.
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        operation().await
    }

    /// Free slots, or `None` when unbounded.
    pub fn available_permits(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_throttling_limits_concurrency() {
        let throttler = Throttler::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let throttler = throttler.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();

            tasks.push(tokio::spawn(async move {
                throttler
                    .execute(|| async {
                        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(current, Ordering::SeqCst);

                        tokio::time::sleep(Duration::from_millis(50)).await;

                        counter.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert!(max_concurrent.load(Ordering::SeqCst) <= 2);
        assert_eq!(throttler.available_permits(), Some(2));
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let throttler = Throttler::new(0);
        assert_eq!(throttler.available_permits(), None);
        let value = tokio_test::block_on(throttler.execute(|| async { 42 }));
        assert_eq!(value, 42);
    }

    /// # Dropped Operation Releases Slot
    ///
    /// Verifies that cancelling an in-flight operation frees its slot.
    #[tokio::test(start_paused = true)]
    async fn test_cancelled_operation_releases_slot() {
        let throttler = Throttler::new(1);
        let slow = throttler.execute(|| tokio::time::sleep(Duration::from_secs(10)));
        let cancelled = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(cancelled.is_err());
        assert_eq!(throttler.available_permits(), Some(1));
    }
}
