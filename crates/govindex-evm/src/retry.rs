//! Exponential backoff for transient provider errors.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use govindex_core::error::IndexerError;
use govindex_core::indexer::RetryConfig;
use tracing::warn;

/// Computes retry delays and drives retry loops.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Never retries. Handy for tests that assert on the first failure.
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
    }

    /// Delay before the `attempt`-th retry (1-based) without jitter, or
    /// `None` once `max_retries` is exceeded.
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_ms = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exp);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Delay before the `attempt`-th retry, spread by up to
    /// `±jitter_fraction` of the base delay.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        if self.config.jitter_fraction <= 0.0 {
            return Some(base);
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        // Map to [-1, 1).
        let unit = (nanos % 2_000) as f64 / 1_000.0 - 1.0;
        let spread = base.as_millis() as f64 * self.config.jitter_fraction * unit;
        let total = (base.as_millis() as f64 + spread).max(0.0);
        Some(Duration::from_millis(total as u64))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget runs out ([`IndexerError::RetriesExhausted`]).
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.next_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            what,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(IndexerError::RetriesExhausted {
                            attempts: attempt,
                            reason: e.to_string(),
                        })
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
            jitter_fraction: 0.0,
        })
    }

    #[test]
    fn delays_grow_then_cap() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            multiplier: 2.0,
            jitter_fraction: 0.0,
        });
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(6), None);
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
            jitter_fraction: 0.2,
        });
        for _ in 0..50 {
            let d = policy.next_delay(1).unwrap().as_millis();
            assert!((800..=1_200).contains(&d), "delay {d}ms outside jitter band");
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let value = fast(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(IndexerError::Timeout { ms: 10 })
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts() {
        let err = fast(2)
            .run("test", || async {
                Err::<(), _>(IndexerError::RateLimited("429".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(IndexerError::Storage("disk".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
