//! Bounded retry policy for store calls
//!
//! Transient failures are retried with exponential backoff and jitter until
//! the attempt budget runs out. Semantic failures (not found, already
//! exists, version conflict, validation) are returned on the first attempt.
//! A policy bound to a cancellation token stops waiting between attempts as
//! soon as the token fires.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::metrics::CoordinatorMetrics;
use backoff::backoff::Backoff;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry policy shared by every store call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Option<Arc<CoordinatorMetrics>>,
    cancel: Option<CancellationToken>,
}

impl RetryPolicy {
    /// Create a policy from configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: None,
            cancel: None,
        }
    }

    /// Record retries into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<CoordinatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Abandon backoff sleeps once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attempt budget per call
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Underlying configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `call` until it succeeds, fails permanently, or exhausts the budget
    pub async fn run<T, F, Fut>(&self, operation: &str, kind: &str, name: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.config.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            if attempt >= self.config.max_attempts {
                warn!(
                    "{} {}/{} failed after {} attempts: {}",
                    operation, kind, name, attempt, err
                );
                return Err(Error::StoreUnavailable {
                    operation: operation.to_string(),
                    kind: kind.to_string(),
                    name: name.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = backoff.next_backoff().unwrap_or_else(|| self.config.max_delay());
            debug!(
                "{} {}/{} attempt {} failed ({}), retrying in {:?}",
                operation, kind, name, attempt, err, delay
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_store_retry(operation);
            }

            match &self.cancel {
                Some(cancel) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("{} {}/{} canceled during backoff", operation, kind, name);
                        return Err(Error::Canceled {
                            volume: name.to_string(),
                            attempts: attempt,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
