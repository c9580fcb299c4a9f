//! Control plane configuration.
//!
//! Recognized options (dotted names as they appear in JSON):
//!
//! | option | default |
//! |---|---|
//! | `rate.enabled` | `true` |
//! | `rate.refillPerSecond` | `2.0` |
//! | `rate.burst` | `4` |
//! | `shutdown.drainTimeout` | 20s |
//! | `shutdown.backgroundTimeout` | unbounded |
//! | `eviction.sweepInterval` | 60s |
//! | `eviction.idleThreshold` | 3 × sweep interval |
//!
//! Durations are given in (fractional) seconds when deserialized.
//!
//! ```rust
//! use greenlight::ControlConfig;
//! use std::time::Duration;
//!
//! let config = ControlConfig::builder()
//!     .refill_per_second(10.0)
//!     .burst(20)
//!     .drain_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.eviction.idle_threshold(), Duration::from_secs(180));
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Default tokens per second granted to each client.
pub const DEFAULT_REFILL_PER_SECOND: f64 = 2.0;
/// Default burst capacity of each client bucket.
pub const DEFAULT_BURST: u32 = 4;
/// Default deadline for draining in-flight requests on shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(20);
/// Default interval between idle-client sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Idle threshold expressed in sweep intervals when not set explicitly.
pub const IDLE_THRESHOLD_INTERVALS: u32 = 3;

/// Per-client token bucket settings and the global on/off switch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitSettings {
    /// When false every admission check allows without touching the registry.
    pub enabled: bool,
    /// Tokens added per second.
    pub refill_per_second: f64,
    /// Bucket capacity (maximum burst).
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { enabled: true, refill_per_second: DEFAULT_REFILL_PER_SECOND, burst: DEFAULT_BURST }
    }
}

impl RateLimitSettings {
    /// Check burst and refill rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.burst == 0 {
            return Err(ConfigError::InvalidBurst { provided: self.burst });
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            return Err(ConfigError::InvalidRefillRate { provided: self.refill_per_second });
        }
        Ok(())
    }
}

/// Deadlines applied while the server shuts down.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShutdownSettings {
    /// Bound on draining the listener and in-flight requests.
    #[serde(with = "secs")]
    pub drain_timeout: Duration,
    /// Optional bound on waiting for background work. `None` waits indefinitely.
    #[serde(with = "secs_opt")]
    pub background_timeout: Option<Duration>,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self { drain_timeout: DEFAULT_DRAIN_TIMEOUT, background_timeout: None }
    }
}

/// Idle-client sweep timing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvictionSettings {
    /// How often the sweep runs.
    #[serde(with = "secs")]
    pub sweep_interval: Duration,
    /// Explicit idle threshold; derived from the sweep interval when absent.
    #[serde(rename = "idleThreshold", with = "secs_opt")]
    pub idle_threshold_override: Option<Duration>,
}

impl Default for EvictionSettings {
    fn default() -> Self {
        Self { sweep_interval: DEFAULT_SWEEP_INTERVAL, idle_threshold_override: None }
    }
}

impl EvictionSettings {
    /// Entries unseen for longer than this are removed by the sweep.
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold_override
            .unwrap_or_else(|| self.sweep_interval.saturating_mul(IDLE_THRESHOLD_INTERVALS))
    }
}

/// Full control plane configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// `rate.*` options.
    pub rate: RateLimitSettings,
    /// `shutdown.*` options.
    pub shutdown: ShutdownSettings,
    /// `eviction.*` options.
    pub eviction: EvictionSettings,
}

impl ControlConfig {
    /// Start a builder seeded with defaults.
    pub fn builder() -> ControlConfigBuilder {
        ControlConfigBuilder::new()
    }

    /// Parse and validate a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigLoadError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every option; returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate.validate()?;
        if self.shutdown.drain_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration { option: "shutdown.drainTimeout" });
        }
        if self.shutdown.background_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroDuration { option: "shutdown.backgroundTimeout" });
        }
        if self.eviction.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration { option: "eviction.sweepInterval" });
        }
        let idle_threshold = self.eviction.idle_threshold();
        if idle_threshold < self.eviction.sweep_interval {
            return Err(ConfigError::IdleThresholdTooShort {
                idle_threshold,
                sweep_interval: self.eviction.sweep_interval,
            });
        }
        Ok(())
    }
}

/// Failure loading configuration from JSON.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// The document is not valid JSON for this schema.
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    /// The document parsed but holds invalid values.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Builder for [`ControlConfig`]; `build()` validates.
#[derive(Debug, Clone, Default)]
pub struct ControlConfigBuilder {
    config: ControlConfig,
}

impl ControlConfigBuilder {
    /// Builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn per-client rate limiting on or off.
    pub fn rate_limit_enabled(mut self, enabled: bool) -> Self {
        self.config.rate.enabled = enabled;
        self
    }

    /// Tokens added to each bucket per second.
    pub fn refill_per_second(mut self, rate: f64) -> Self {
        self.config.rate.refill_per_second = rate;
        self
    }

    /// Bucket capacity.
    pub fn burst(mut self, burst: u32) -> Self {
        self.config.rate.burst = burst;
        self
    }

    /// Listener drain deadline.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown.drain_timeout = timeout;
        self
    }

    /// Bound the wait for background work during shutdown.
    pub fn background_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown.background_timeout = Some(timeout);
        self
    }

    /// Interval between idle-client sweeps.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.eviction.sweep_interval = interval;
        self
    }

    /// Idle time after which a client's bucket is evicted.
    pub fn idle_threshold(mut self, threshold: Duration) -> Self {
        self.config.eviction.idle_threshold_override = Some(threshold);
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<ControlConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let raw = f64::deserialize(de)?;
        Duration::try_from_secs_f64(raw).map_err(D::Error::custom)
    }
}

mod secs_opt {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(de)? {
            Some(raw) => Duration::try_from_secs_f64(raw).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}
