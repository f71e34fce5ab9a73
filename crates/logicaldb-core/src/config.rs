//! Runtime configuration with builder pattern.
//!
//! Covers the batch retry policy and default page sizes for queries and
//! scans. Everything has a sensible default; `Config::default()` is what
//! most callers want.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of items per query page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default number of items requested per scan call.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 1000;

/// Capped exponential backoff applied to unprocessed batch items and
/// retryable store errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per physical batch call, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delays to sleep between attempts, jittered and capped at
    /// `max_backoff`. Yields `max_attempts - 1` values, so running out means
    /// the retry budget is spent.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        // backon counts retries, not attempts.
        let schedule = ExponentialBuilder::new()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier as f32)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .build();
        let (jitter, cap) = (self.jitter, self.max_backoff);
        schedule.map(move |delay| apply_jitter(delay, jitter).min(cap))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(
                "retry jitter must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::Invalid(
                "initial_backoff must not exceed max_backoff".to_string(),
            ));
        }
        Ok(())
    }
}

/// Spread `delay` uniformly over `delay * (1 +/- factor)`.
fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = factor.clamp(0.0, 1.0);
    let base = delay.as_nanos() as f64;
    let jittered = rand::thread_rng().gen_range(base * (1.0 - factor)..=base * (1.0 + factor));
    Duration::from_nanos(jittered as u64)
}

/// Configuration shared by every view bound from one factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub retry_policy: RetryPolicy,
    pub default_page_size: usize,
    pub scan_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            default_page_size: DEFAULT_PAGE_SIZE,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check a configuration assembled by hand or deserialized.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy.validate()?;
        if self.default_page_size == 0 || self.scan_page_size == 0 {
            return Err(ConfigError::Invalid(
                "page sizes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    retry_policy: Option<RetryPolicy>,
    default_page_size: Option<usize>,
    scan_page_size: Option<usize>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_default_page_size(mut self, n: usize) -> Self {
        self.default_page_size = Some(n);
        self
    }

    #[must_use]
    pub fn with_scan_page_size(mut self, n: usize) -> Self {
        self.scan_page_size = Some(n);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let config = Config {
            retry_policy: self.retry_policy.unwrap_or(defaults.retry_policy),
            default_page_size: self.default_page_size.unwrap_or(defaults.default_page_size),
            scan_page_size: self.scan_page_size.unwrap_or(defaults.scan_page_size),
        };
        config.validate()?;
        Ok(config)
    }
}
