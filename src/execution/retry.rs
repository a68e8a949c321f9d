//! Bounded exponential-backoff retry for outbound REST calls

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::ExecutionConfig;
use crate::error::{Result, TraderError};

/// Retries transport failures and a configured set of HTTP statuses.
///
/// A venue-level rejection (`retCode != 0`) is never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        retry_statuses: Vec<u16>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            retry_statuses,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.retry_statuses.clone(),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, err: &TraderError) -> bool {
        match err {
            TraderError::Transport(_) => true,
            TraderError::HttpStatus { status, .. } => self.retry_statuses.contains(status),
            _ => false,
        }
    }

    /// Delay after the given failed attempt (1-based): `base × 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(call = label, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if self.is_retryable(&e) && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        call = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(call = label, attempt, error = %e, "Request failed");
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_secs(2),
            Duration::from_secs(5),
            vec![503],
        );
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_classification() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&TraderError::Transport("reset".into())));
        assert!(policy.is_retryable(&TraderError::HttpStatus {
            status: 503,
            body: String::new()
        }));
        assert!(!policy.is_retryable(&TraderError::HttpStatus {
            status: 400,
            body: String::new()
        }));
        assert!(!policy.is_retryable(&TraderError::VenueRejected {
            code: 10001,
            message: "bad qty".into()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();

        let result: Result<()> = policy
            .run("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TraderError::HttpStatus {
                        status: 503,
                        body: "unavailable".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(TraderError::HttpStatus { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s + 4s of backoff
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = RetryPolicy::default()
            .run("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TraderError::VenueRejected {
                        code: 110007,
                        message: "insufficient balance".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(TraderError::VenueRejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let value = RetryPolicy::default()
            .run("test", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TraderError::Transport("timeout".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
