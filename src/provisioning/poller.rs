//! Convergence polling
//!
//! Waits for the node reconciler to report a logical volume as created at
//! the requested size. Every wait is bounded by a [`WaitLimit`] and can be
//! canceled between attempts and during sleeps.

use super::client::ResourceClient;
use crate::config::PollConfig;
use crate::crd::LogicalVolumePhase;
use crate::error::{Error, Result};
use crate::quantity::{format_binary_si, sizes_equal_within_delta};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// =============================================================================
// Wait Limit
// =============================================================================

/// Longest wall-clock budget a wait may ask for
pub const MAX_WAIT_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Bound on a convergence wait. At least one field must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitLimit {
    /// Wall-clock budget
    pub timeout: Option<Duration>,
    /// Status read budget
    pub max_attempts: Option<u32>,
}

impl WaitLimit {
    /// Limit by wall-clock time only
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            max_attempts: None,
        }
    }

    /// Limit by status reads only
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            timeout: None,
            max_attempts: Some(max_attempts),
        }
    }

    /// Reject unbounded limits
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_none() && self.max_attempts.is_none() {
            return Err(Error::Configuration(
                "wait limit needs a timeout or a maximum number of attempts".into(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::Configuration("wait limit allows zero attempts".into()));
        }
        if let Some(timeout) = self.timeout.filter(|t| *t > MAX_WAIT_TIMEOUT) {
            return Err(Error::Configuration(format!(
                "wait timeout of {}s exceeds the {}s maximum",
                timeout.as_secs(),
                MAX_WAIT_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Convergence Poller
// =============================================================================

/// Polls logical volume status until it converges
#[derive(Clone)]
pub struct ConvergencePoller {
    client: ResourceClient,
    config: PollConfig,
}

impl ConvergencePoller {
    pub fn new(client: ResourceClient, config: PollConfig) -> Self {
        Self { client, config }
    }

    /// Poll `name` until it is Created with an actual size within
    /// `tolerance` bytes of `desired_size`. Returns the number of status reads.
    pub async fn wait_for_creation(
        &self,
        name: &str,
        desired_size: i64,
        tolerance: i64,
        limit: &WaitLimit,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        limit.validate()?;

        let client = self.client.with_cancel(cancel);
        let interval = self.config.interval();
        let progress_every = self.config.progress_every.max(1);
        let deadline = match limit.timeout {
            Some(timeout) => Some(Instant::now().checked_add(timeout).ok_or_else(|| {
                Error::Configuration(format!("wait timeout of {}s is out of range", timeout.as_secs()))
            })?),
            None => None,
        };
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Canceled {
                    volume: name.to_string(),
                    attempts,
                });
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(Error::ConvergenceTimeout {
                    volume: name.to_string(),
                    attempts,
                });
            }

            attempts += 1;
            let volume = client.get(name).await?;

            if volume.deletion_requested() {
                return Err(Error::ConflictingDeletion {
                    volume: name.to_string(),
                });
            }

            match volume.phase() {
                LogicalVolumePhase::Failed => {
                    return Err(Error::VolumeFailed {
                        volume: name.to_string(),
                        reason: volume.failure_reason().to_string(),
                    });
                }
                LogicalVolumePhase::Created => match volume.actual_size()? {
                    Some(actual) if sizes_equal_within_delta(actual, desired_size, tolerance) => {
                        debug!(
                            "LVMLogicalVolume {} converged at {} after {} attempts",
                            name,
                            format_binary_si(actual),
                            attempts
                        );
                        return Ok(attempts);
                    }
                    actual => debug!(
                        "LVMLogicalVolume {} is Created but reports size {:?}, want {}",
                        name,
                        actual.map(format_binary_si),
                        format_binary_si(desired_size)
                    ),
                },
                phase => debug!("LVMLogicalVolume {} is in phase {}", name, phase),
            }

            if attempts % progress_every == 0 {
                info!(
                    "Still waiting for LVMLogicalVolume {} after {} attempts",
                    name, attempts
                );
            }

            if limit.max_attempts.map_or(false, |max| attempts >= max) {
                return Err(Error::ConvergenceTimeout {
                    volume: name.to_string(),
                    attempts,
                });
            }

            let nap = match deadline {
                Some(d) => interval.min(d.saturating_duration_since(Instant::now())),
                None => interval,
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Canceled {
                        volume: name.to_string(),
                        attempts,
                    });
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}
