use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::ModelError;

/// Errors that know whether another attempt can succeed.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;

    /// Server-provided minimum wait, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for ModelError {
    fn is_retryable(&self) -> bool {
        match self {
            ModelError::Network(_) | ModelError::RateLimited { .. } | ModelError::Timeout(_) => true,
            ModelError::InvalidResponse(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0..=1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based), before jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }

    fn delay_for<E: IsRetryable>(&self, retry: u32, error: &E) -> Duration {
        let base = self.base_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 && !base.is_zero() {
            let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
            base.mul_f64(factor).min(self.max_delay)
        } else {
            base
        };
        error.retry_after().map_or(delay, |hint| delay.max(hint))
    }
}

/// Why [`with_retry`] gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The last error, after `attempts` tries (non-retryable errors stop at once)
    Failed { attempts: u32, error: E },
    Cancelled { attempts: u32 },
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Cancellation is observed both during an attempt
/// and during the backoff sleep.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut on_retry: impl FnMut(u32, &E, Duration),
    mut op: F,
) -> Result<(T, u32), RetryError<E>>
where
    E: IsRetryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = tokio::select! {
            result = op() => result,
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
        };

        let error = match result {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            return Err(RetryError::Failed { attempts: attempt, error });
        }

        let delay = config.delay_for(attempt, &error);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Model call failed, retrying"
        );
        on_retry(attempt, &error, delay);

        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn base_delay_grows_and_caps() {
        let config = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.base_delay(1), Duration::from_secs(1));
        assert_eq!(config.base_delay(2), Duration::from_secs(2));
        assert_eq!(config.base_delay(3), Duration::from_secs(4));
        assert_eq!(config.base_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn classification_matches_error_kinds() {
        assert!(ModelError::Network("reset".into()).is_retryable());
        assert!(ModelError::RateLimited { retry_after: None }.is_retryable());
        assert!(!ModelError::InvalidResponse("bad json".into()).is_retryable());
        assert!(ModelError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut retries = Vec::new();

        let result = with_retry(
            &fast_config(3),
            &CancellationToken::new(),
            |attempt, _err: &ModelError, _| retries.push(attempt),
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ModelError::Network("reset".into()))
                    } else {
                        Ok("ok")
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(("ok", 3)));
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn invalid_response_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<((), u32), _> = with_retry(
            &fast_config(5),
            &CancellationToken::new(),
            |_, _, _| {},
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ModelError::InvalidResponse("garbage".into()))
                }
            },
        )
        .await;

        assert_eq!(
            result,
            Err(RetryError::Failed {
                attempts: 1,
                error: ModelError::InvalidResponse("garbage".into())
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let result: Result<((), u32), _> = with_retry(
            &fast_config(2),
            &CancellationToken::new(),
            |_, _, _| {},
            || async { Err(ModelError::RateLimited { retry_after: None }) },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Failed { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..fast_config(3)
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result: Result<((), u32), _> = with_retry(
            &config,
            &cancel,
            move |_, _, _| trigger.cancel(),
            || async { Err(ModelError::Network("down".into())) },
        )
        .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
    }
}
