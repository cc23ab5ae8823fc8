//! Bounded retry with exponential backoff (C3), made cancellation-aware via
//! the ambient `CancellationToken` threaded through dispatch and sends.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<E> {
    Exhausted(E),
    Cancelled,
}

/// Invokes `op` up to `max_attempts` times. Sleeps `2^i` seconds between
/// attempt `i` and `i+1` (1, 2, 4, ...). Returns `Ok` on the first success,
/// or `Err(RetryOutcome::Exhausted(last_error))` once all attempts fail.
/// A cancelled `token` aborts an in-flight sleep early and returns
/// `Err(RetryOutcome::Cancelled)`.
pub async fn retry<F, Fut, T, E>(
    mut op: F,
    max_attempts: u32,
    token: &CancellationToken,
) -> Result<T, RetryOutcome<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts {
        if token.is_cancelled() {
            return Err(RetryOutcome::Cancelled);
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < max_attempts {
                    let backoff = Duration::from_secs(1u64 << attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = token.cancelled() => return Err(RetryOutcome::Cancelled),
                    }
                }
            }
        }
    }
    Err(RetryOutcome::Exhausted(last_err.expect("max_attempts >= 1")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt_without_sleeping() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), RetryOutcome<&str>> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            3,
            &token,
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts_with_expected_backoff() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let result: Result<(), RetryOutcome<&str>> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            3,
            &token,
        )
        .await;
        assert_eq!(result, Err(RetryOutcome::Exhausted("boom")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s = 3s total sleep between the three attempts.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_a_pending_sleep() {
        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token_clone.cancel();
        });
        let result: Result<(), RetryOutcome<&str>> =
            retry(|| async { Err("boom") }, 5, &token).await;
        assert_eq!(result, Err(RetryOutcome::Cancelled));
    }
}
