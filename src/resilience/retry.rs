//! # Retry Policy
//!
//! Bounded retry loop around a single external call: a fixed number of attempts,
//! a fixed backoff between them and a hard timeout on every attempt. A timed-out
//! attempt is cancelled (its future is dropped) and surfaces as
//! [`PipelineError::Timeout`].

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::DocumentsConfig;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            call_timeout,
        }
    }

    pub fn from_config(config: &DocumentsConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_backoff(),
            config.call_timeout(),
        )
    }

    /// Run `operation` until it succeeds or the attempts are exhausted, returning the
    /// last error in the latter case
    pub async fn call<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> PipelineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let start = Instant::now();
            let result = match tokio::time::timeout(self.call_timeout, operation(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout(format!(
                    "{operation_name} exceeded {}ms",
                    self.call_timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Attempt succeeded"
                    );
                    return Ok(value);
                }
                Err(error) => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Attempt failed"
                    );
                    last_error = Some(error);
                    if attempt < self.max_attempts && !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PipelineError::internal(format!("{operation_name} made no attempts"))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .call("flaky", |attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(PipelineError::Document("not yet".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let policy = RetryPolicy::new(2, Duration::ZERO, Duration::from_secs(1));
        let err = policy
            .call("always_fails", |attempt| async move {
                Err::<(), _>(PipelineError::Document(format!("attempt {attempt}")))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Document processing error: attempt 2");
    }

    #[tokio::test]
    async fn test_per_call_timeout_cancels_attempt() {
        let policy = RetryPolicy::new(1, Duration::ZERO, Duration::from_millis(20));
        let err = policy
            .call("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(_)));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
    }
}
