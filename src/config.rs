//! Coordinator configuration
//!
//! Every retry budget, delay and timeout is carried here and threaded through
//! constructors. The structure deserializes from YAML with a default for
//! every field, so a config file only needs to name what it changes.

use crate::error::{Error, Result};
use crate::provisioning::poller::WaitLimit;
use crate::quantity::parse_quantity;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default finalizer placed on every LVMLogicalVolume the coordinator creates
pub const DEFAULT_FINALIZER: &str = "storage.deckhouse.io/local-volume-coordinator";

// =============================================================================
// Coordinator Configuration
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Store call retry policy
    pub retry: RetryConfig,
    /// Convergence polling
    pub poll: PollConfig,
    /// Finalizer handling
    pub finalizer: FinalizerConfig,
}

impl CoordinatorConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Reject configurations that would retry forever or never retry
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.poll.validate()?;
        self.finalizer.validate()
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

/// Bounded exponential backoff with jitter for store calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Attempts per store call, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
    /// Growth factor between delays
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 - 1.0)
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            randomization_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Fresh backoff schedule; no elapsed-time cap, attempts bound the loop
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_delay_ms))
            .with_max_interval(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Upper bound for a single delay
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Configuration("retry.maxAttempts must be at least 1".into()));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::Configuration(format!(
                "retry.initialDelayMs ({}) exceeds retry.maxDelayMs ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        if self.multiplier < 1.0 {
            return Err(Error::Configuration("retry.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(Error::Configuration(
                "retry.randomizationFactor must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Poll Configuration
// =============================================================================

/// Convergence polling; at least one bound must be set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollConfig {
    /// Delay between status reads
    pub interval_ms: u64,
    /// Log progress every N attempts
    pub progress_every: u32,
    /// Give up after this many seconds
    pub timeout_secs: Option<u64>,
    /// Give up after this many status reads
    pub max_attempts: Option<u32>,
    /// Default tolerance for size comparisons, as a quantity
    pub size_tolerance: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            progress_every: 10,
            timeout_secs: Some(300),
            max_attempts: None,
            size_tolerance: "1Gi".to_string(),
        }
    }
}

impl PollConfig {
    /// Delay between status reads
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Size tolerance in bytes
    pub fn size_tolerance_bytes(&self) -> Result<i64> {
        parse_quantity(&self.size_tolerance)
    }

    /// Wait limit starting now
    pub fn limit(&self) -> WaitLimit {
        WaitLimit {
            timeout: self.timeout_secs.map(Duration::from_secs),
            max_attempts: self.max_attempts,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::Configuration("poll.intervalMs must be positive".into()));
        }
        if self.progress_every == 0 {
            return Err(Error::Configuration("poll.progressEvery must be positive".into()));
        }
        self.limit().validate()?;
        if self.size_tolerance_bytes()? <= 0 {
            return Err(Error::Configuration("poll.sizeTolerance must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Finalizer Configuration
// =============================================================================

/// Finalizer token and its removal budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinalizerConfig {
    /// Token placed on created records
    pub token: String,
    /// Conditional update attempts when removing the token
    pub max_attempts: u32,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            token: DEFAULT_FINALIZER.to_string(),
            max_attempts: 3,
        }
    }
}

impl FinalizerConfig {
    fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(Error::Configuration("finalizer.token must not be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Configuration("finalizer.maxAttempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::GI;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.poll.interval(), Duration::from_millis(500));
        assert_eq!(config.poll.size_tolerance_bytes().unwrap(), GI);
        assert_eq!(config.finalizer.token, DEFAULT_FINALIZER);
    }

    #[test]
    fn test_partial_yaml() {
        let config = CoordinatorConfig::from_yaml(
            r#"
retry:
  maxAttempts: 5
poll:
  intervalMs: 250
  sizeTolerance: 512Mi
"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.poll.interval_ms, 250);
        assert_eq!(config.poll.size_tolerance_bytes().unwrap(), GI / 2);
        assert_eq!(config.finalizer.max_attempts, 3);
    }

    #[test]
    fn test_unbounded_wait_rejected() {
        let result = CoordinatorConfig::from_yaml(
            r#"
poll:
  timeoutSecs: null
  maxAttempts: null
"#,
        );
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_huge_timeout_rejected() {
        assert_matches!(
            CoordinatorConfig::from_yaml("poll:\n  timeoutSecs: 18446744073709551615\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            CoordinatorConfig::from_yaml("poll:\n  timeoutSecs: 604801\n"),
            Err(Error::Configuration(_))
        );
        let config = CoordinatorConfig::from_yaml("poll:\n  timeoutSecs: 604800\n").unwrap();
        assert_eq!(config.poll.timeout_secs, Some(604_800));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert_matches!(
            CoordinatorConfig::from_yaml("retry:\n  maxAttempts: 0\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            CoordinatorConfig::from_yaml("retry:\n  randomizationFactor: 1.5\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            CoordinatorConfig::from_yaml("finalizer:\n  token: ''\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            CoordinatorConfig::from_yaml("poll:\n  sizeTolerance: lots\n"),
            Err(Error::CapacityParse(_))
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "finalizer:\n  token: example.io/cleanup\n  maxAttempts: 7").unwrap();

        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.finalizer.token, "example.io/cleanup");
        assert_eq!(config.finalizer.max_attempts, 7);
    }

    #[test]
    fn test_backoff_respects_bounds() {
        use backoff::backoff::Backoff;

        let retry = RetryConfig {
            initial_delay_ms: 100,
            max_delay_ms: 400,
            randomization_factor: 0.0,
            ..Default::default()
        };
        let mut backoff = retry.backoff();
        let delays: Vec<u128> = (0..4)
            .map(|_| backoff.next_backoff().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 400]);
    }
}
