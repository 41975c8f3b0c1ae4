//! Engine configuration
//!
//! Loaded from the environment under the `COLLECT_` prefix, with defaults
//! suitable for tests. The retry policy exists for one purpose: the
//! processor writes invoice metadata asynchronously after invoice creation,
//! so the first mapping read after an invoice event can miss.

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment};
use core_kernel::ProductId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry for reads that can lag behind a processor write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// A policy with no delay, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay_ms: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_ms: 5_000,
        }
    }
}

/// Configuration for the reconciliation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Processor product all prices are created under
    pub product_id: ProductId,
    /// Timezone payment dates are reported in
    pub timezone: Tz,
    /// Days after inception during which cancellation refunds in full
    pub cooling_off_days: u32,
    /// How many recent charges to consider for refunds
    pub charge_lookback: u32,
    /// Retry for the invoice metadata read
    pub metadata_retry: RetryPolicy,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            product_id: ProductId::new("prod_default"),
            timezone: chrono_tz::Africa::Johannesburg,
            cooling_off_days: 14,
            charge_lookback: 3,
            metadata_retry: RetryPolicy::default(),
        }
    }
}

impl CollectionConfig {
    /// Loads configuration from `COLLECT_`-prefixed environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("COLLECT").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollectionConfig::default();
        assert_eq!(config.cooling_off_days, 14);
        assert_eq!(config.charge_lookback, 3);
        assert_eq!(config.metadata_retry.max_attempts, 2);
        assert_eq!(config.timezone, chrono_tz::Africa::Johannesburg);
    }

    #[test]
    fn test_immediate_retry_has_no_delay() {
        let retry = RetryPolicy::immediate(2);
        assert_eq!(retry.delay(), Duration::ZERO);
    }
}
