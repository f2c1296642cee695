//! Retry policy for blocking provider calls: exponential backoff with
//! jitter, `Retry-After` honored when the provider reports one, and
//! cancellation never retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::ProviderError;

/// Retry attempts after the initial request.
pub const MAX_RETRIES: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_JITTER: Duration = Duration::from_millis(250);

pub async fn with_backoff<T, F, Fut>(
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::canceled());
        }

        let result = tokio::select! {
            result = call() => result,
            _ = cancel.cancelled() => return Err(ProviderError::canceled()),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.canceled => return Err(e),
            Err(e) if e.retryable && attempt < MAX_RETRIES => {
                let delay = e.retry_after.unwrap_or_else(|| backoff_delay(attempt));
                attempt += 1;
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying provider call");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ProviderError::canceled()),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY * 2u32.saturating_pow(attempt.min(16));
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..=MAX_JITTER);
    exp + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = attempts.clone();
        let result = with_backoff(&cancel, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::transient("429"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = attempts.clone();
        let result: Result<(), _> = with_backoff(&cancel, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::fatal("bad request"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = attempts.clone();
        let result: Result<(), _> = with_backoff(&cancel, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::transient("503"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1 + MAX_RETRIES);
    }

    #[tokio::test]
    async fn canceled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            with_backoff(&cancel, || async { Ok(()) }).await;
        assert!(result.unwrap_err().canceled);
    }
}
