//! Exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay before retry number `retry` (1-based): 2^retry seconds.
pub fn retry_delay(retry: u32) -> Duration {
    Duration::from_secs(1u64 << retry.min(16))
}

/// Run `op`, retrying transient failures up to `max_retries` times with
/// exponential backoff (2s, 4s, 8s, ...). Non-transient errors and
/// exhausted retries are returned to the caller unchanged.
pub async fn retry_transient<T, E, F, Fut, P>(
    max_retries: u32,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut retry = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && retry < max_retries => {
                retry += 1;
                let delay = retry_delay(retry);
                warn!(
                    retry,
                    max_retries,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn delays_double_per_retry() {
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(2), Duration::from_secs(4));
        assert_eq!(retry_delay(3), Duration::from_secs(8));
        // Capped so a runaway retry counter cannot overflow the shift.
        assert_eq!(retry_delay(40), Duration::from_secs(65536));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds_with_increasing_delays() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result = retry_transient(3, |_: &String| true, || async {
            let n = attempts.fetch_add(1, Ordering::Relaxed);
            if n < 3 {
                Err(format!("transient failure {n}"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
        // Three waits of 2s, 4s, 8s.
        assert_eq!(started.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn abandons_after_exhausting_retries() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), String> = retry_transient(3, |_: &String| true, || async {
            attempts.fetch_add(1, Ordering::Relaxed);
            Err("still down".to_string())
        })
        .await;

        assert_eq!(result, Err("still down".to_string()));
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), String> = retry_transient(3, |_: &String| false, || async {
            attempts.fetch_add(1, Ordering::Relaxed);
            Err("quota".to_string())
        })
        .await;

        assert_eq!(result, Err("quota".to_string()));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
