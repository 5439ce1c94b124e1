//! Retry with exponential backoff and jitter for upstream calls.
//!
//! Policy: up to 3 attempts per operation. Only retryable kinds
//! (`RateLimited`, `UpstreamUnavailable`) are retried; `BadInput` and
//! `NotFound` surface immediately. A `retry_after` hint from the upstream
//! overrides the computed delay.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{RagError, Result};

/// Attempts per operation, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 8_000;

/// Run `op` until it succeeds, fails terminally, or exhausts `MAX_ATTEMPTS`.
pub async fn with_backoff<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt, retry_after_hint(&err));
                tracing::warn!(
                    "{label}: attempt {attempt}/{MAX_ATTEMPTS} failed ({err}), retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn retry_after_hint(err: &RagError) -> Option<u64> {
    match err {
        RagError::RateLimited { retry_after } => *retry_after,
        _ => None,
    }
}

/// Exponential delay with up to 50% additive jitter, capped at `MAX_DELAY_MS`.
fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs.min(MAX_DELAY_MS / 1_000));
    }
    let base = (BASE_DELAY_MS << (attempt - 1).min(4)).min(MAX_DELAY_MS);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis((base + jitter).min(MAX_DELAY_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<&str> = with_backoff("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RagError::upstream("flaky"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RagError::upstream("down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_bad_input_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RagError::bad_input("nope")) }
        })
        .await;
        assert!(matches!(result, Err(RagError::BadInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        for _ in 0..20 {
            let d1 = backoff_delay(1, None);
            let d3 = backoff_delay(3, None);
            assert!(d1.as_millis() >= 500);
            assert!(d1.as_millis() <= 750 + 1);
            assert!(d3.as_millis() >= 2_000);
            assert!(d3.as_millis() <= 3_000 + 1);
            assert!(backoff_delay(10, None).as_millis() <= MAX_DELAY_MS as u128);
        }
    }

    #[test]
    fn test_retry_after_hint_wins() {
        let d = backoff_delay(1, Some(2));
        assert_eq!(d, Duration::from_secs(2));
    }
}
