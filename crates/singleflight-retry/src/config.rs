//! Serializable backoff settings
//!
//! [`RetryConfig`] carries the numeric knobs of a controller so they can live in
//! a configuration file next to the rest of an application's settings:
//!
//! ```toml
//! retry_min = 250
//! retry_base = 1.5
//! retry_exponent = 12
//! retry_limit = 8
//! ```
//!
//! Every field is optional and falls back to the controller defaults.

use crate::backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff settings for a [`RetryController`](crate::RetryController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Minimum wait in milliseconds added to every backoff delay.
    pub retry_min: u64,

    /// Growth factor of the backoff ceiling per failure.
    pub retry_base: f64,

    /// Failure count after which the backoff ceiling stops growing.
    pub retry_exponent: u32,

    /// Maximum number of recorded failures before giving up (`None` = unbounded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_min: 0,
            retry_base: 1.2,
            retry_exponent: 33,
            retry_limit: None,
        }
    }
}

impl RetryConfig {
    /// The default delay policy described by these settings.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::builder()
            .min(Duration::from_millis(self.retry_min))
            .base(self.retry_base)
            .exponent(self.retry_exponent)
            .build()
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        config.backoff()
    }
}
