//! Configuration types for the Warden supervisor

use crate::error::{Result, WardenError};
use crate::lifecycle::{RestartPolicy, RestartStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for Warden
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    /// Lifecycle supervision policy
    pub lifecycle: LifecycleConfig,
}

/// Lifecycle supervision policy
///
/// Shared by every supervised agent and read-only once the manager is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Consecutive automatic restarts before the monitor gives up on an agent
    pub max_restart_attempts: u32,

    /// Pause between the stop and start halves of a restart
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,

    /// Interval between monitor passes
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Upper bound on a registry stop call
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Upper bound on the post-start health wait
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Automatic restart strategy
    pub restart_strategy: RestartStrategy,

    /// Delay used by the fixed-interval strategy
    #[serde(with = "humantime_serde")]
    pub restart_interval: Duration,

    /// Cap on restarts per agent within a rolling hour
    pub max_restarts_per_hour: usize,

    /// Cap on exponential backoff delays
    #[serde(with = "humantime_serde")]
    pub max_restart_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_restart_attempts: 3,
            restart_delay: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(60),
            restart_strategy: RestartStrategy::OnFailure,
            restart_interval: Duration::from_secs(60),
            max_restarts_per_hour: 10,
            max_restart_delay: Duration::from_secs(300),
        }
    }
}

impl LifecycleConfig {
    /// Builder: set max consecutive restart attempts
    pub fn with_max_restart_attempts(mut self, attempts: u32) -> Self {
        self.max_restart_attempts = attempts;
        self
    }

    /// Builder: set restart delay
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Builder: set health check interval
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Builder: set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builder: set startup timeout
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Builder: set restart strategy
    pub fn with_restart_strategy(mut self, strategy: RestartStrategy) -> Self {
        self.restart_strategy = strategy;
        self
    }

    /// Builder: set fixed restart interval
    pub fn with_restart_interval(mut self, interval: Duration) -> Self {
        self.restart_interval = interval;
        self
    }

    /// Builder: set hourly restart cap
    pub fn with_max_restarts_per_hour(mut self, max: usize) -> Self {
        self.max_restarts_per_hour = max;
        self
    }

    /// Builder: set backoff cap
    pub fn with_max_restart_delay(mut self, delay: Duration) -> Self {
        self.max_restart_delay = delay;
        self
    }

    /// Resolve the configured strategy into a [`RestartPolicy`]
    pub fn restart_policy(&self) -> RestartPolicy {
        match self.restart_strategy {
            RestartStrategy::Never => RestartPolicy::Never,
            RestartStrategy::OnFailure => RestartPolicy::OnFailure {
                delay: self.restart_delay,
            },
            RestartStrategy::Always => RestartPolicy::Always {
                delay: self.restart_delay,
            },
            RestartStrategy::ExponentialBackoff => RestartPolicy::ExponentialBackoff {
                base: self.restart_delay,
                max: self.max_restart_delay,
            },
            RestartStrategy::FixedInterval => RestartPolicy::FixedInterval {
                interval: self.restart_interval,
            },
        }
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if an interval or cap would stall the supervisor.
    pub fn validate(&self) -> Result<()> {
        if self.health_check_interval.is_zero() {
            return Err(WardenError::InvalidConfig(
                "health_check_interval must be greater than zero".to_string(),
            ));
        }

        if self.max_restarts_per_hour == 0 {
            return Err(WardenError::InvalidConfig(
                "max_restarts_per_hour must be greater than zero".to_string(),
            ));
        }

        if self.max_restart_delay < self.restart_delay {
            return Err(WardenError::InvalidConfig(format!(
                "max_restart_delay ({:?}) is shorter than restart_delay ({:?})",
                self.max_restart_delay, self.restart_delay
            )));
        }

        Ok(())
    }
}

impl WardenConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (`warden.toml`)
    /// 3. File named by `WARDEN_CONFIG_PATH`, if set
    /// 4. `WARDEN_` environment variables, `__` separating nested keys
    ///    (e.g. `WARDEN_LIFECYCLE__MAX_RESTARTS_PER_HOUR=5`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is malformed or the result
    /// fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(WardenConfig::default()))
            .merge(Toml::file("warden.toml"));

        if let Ok(path) = std::env::var("WARDEN_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: WardenConfig = figment
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()
            .map_err(|e| {
                WardenError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        tracing::debug!(lifecycle = ?config.lifecycle, "Loaded configuration");
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: WardenConfig = Figment::from(Serialized::defaults(WardenConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                WardenError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        self.lifecycle.validate()
    }
}
