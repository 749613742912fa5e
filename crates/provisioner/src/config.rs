//! Configuration for provisioning runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::retry::RetryPolicy;

/// Tunables of the convergence engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Backoff policy for list and column creation.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Pause after creating a list, before touching it again.
    #[serde(
        rename = "list_settle_delay_ms",
        with = "duration_ms",
        default = "default_list_settle_delay"
    )]
    pub list_settle_delay: Duration,

    /// Pause after creating a column, before refining its metadata.
    #[serde(
        rename = "column_settle_delay_ms",
        with = "duration_ms",
        default = "default_column_settle_delay"
    )]
    pub column_settle_delay: Duration,

    /// Populate empty lists with canned records once structure converges.
    #[serde(default = "default_seed")]
    pub seed: bool,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            list_settle_delay: default_list_settle_delay(),
            column_settle_delay: default_column_settle_delay(),
            seed: default_seed(),
        }
    }
}

impl ProvisionerConfig {
    /// Config with every delay set to zero. Meant for in-memory stores.
    pub const fn without_delays() -> Self {
        Self {
            retry: RetryPolicy::immediate(3),
            list_settle_delay: Duration::ZERO,
            column_settle_delay: Duration::ZERO,
            seed: true,
        }
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable seeding.
    #[must_use]
    pub const fn with_seed(mut self, seed: bool) -> Self {
        self.seed = seed;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ProvisionError::invalid_config(
                "retry.max_attempts must be greater than 0",
            ));
        }

        if self.retry.max_delay < self.retry.base_delay {
            return Err(ProvisionError::invalid_config(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms",
            ));
        }

        Ok(())
    }
}

const fn default_list_settle_delay() -> Duration {
    Duration::from_millis(1_000)
}

const fn default_column_settle_delay() -> Duration {
    Duration::from_millis(250)
}

const fn default_seed() -> bool {
    true
}

/// Serialization helper for Duration as milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.list_settle_delay, Duration::from_secs(1));
        assert!(config.seed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: ProvisionerConfig = toml::from_str(
            r"
            list_settle_delay_ms = 2000
            seed = false

            [retry]
            max_attempts = 4
            base_delay_ms = 100
            ",
        )
        .unwrap();

        assert_eq!(config.list_settle_delay, Duration::from_secs(2));
        assert_eq!(config.column_settle_delay, Duration::from_millis(250));
        assert!(!config.seed);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = ProvisionerConfig::default().with_retry(RetryPolicy::immediate(0));
        assert!(config.validate().is_err());
    }
}
