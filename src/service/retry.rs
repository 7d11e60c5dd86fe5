use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::{IsRetryable, PortalError};

/// Bounded exponential backoff applied to store calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    min_delay: Duration,
    max_delay: Duration,
    max_times: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self {
            min_delay: cfg.retry_min_delay(),
            max_delay: cfg.retry_max_delay(),
            max_times: cfg.retry_max_times,
        }
    }

    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times)
            .with_jitter()
    }

    /// Run `op`, retrying only while it fails with a retryable store error.
    pub async fn run<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T, PortalError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PortalError>>,
    {
        op.retry(self.builder())
            .when(|e: &PortalError| e.is_retryable())
            .notify(|err: &PortalError, dur: Duration| {
                warn!(op = what, error = %err, "store call failed, retrying in {:?}", dur);
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::validation::ValidationError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_times: usize) -> RetryPolicy {
        RetryPolicy::from_config(&StoreConfig {
            retry_min_delay_ms: 1,
            retry_max_delay_ms: 2,
            retry_max_times: max_times,
            ..StoreConfig::default()
        })
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_the_bound() {
        let calls = AtomicUsize::new(0);
        let res: Result<(), _> = fast(3)
            .run("flaky", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PortalError::StoreUnavailable("down".into()))
            })
            .await;
        assert!(matches!(res, Err(PortalError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn recovers_when_the_store_comes_back() {
        let calls = AtomicUsize::new(0);
        let res = fast(3)
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PortalError::StoreUnavailable("busy".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_are_attempted_once() {
        let calls = AtomicUsize::new(0);
        let res: Result<(), _> = fast(3)
            .run("flaky", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ValidationError::new("name", "bad").into())
            })
            .await;
        assert!(matches!(res, Err(PortalError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
