//! Shared configuration for the protogate gateway.
//!
//! [`Config`] is assembled by `ortho_config` from defaults, an optional
//! configuration file, `PROTOGATE_*` environment variables and command-line
//! flags, in increasing order of precedence. It carries the logging setup and
//! the operational constants of the correlation core (sweep cadence, idle
//! threshold, reply timeout and executor backlog).
//!
//! Adapter-specific values live in [`Settings`], an immutable snapshot built
//! once through [`SettingsBuilder`] and handed to each plugin when the gateway
//! starts.

mod defaults;
mod logging;
mod settings;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_EXECUTOR_BACKLOG, DEFAULT_IDLE_THRESHOLD_SECS, DEFAULT_LOG_FILTER,
    DEFAULT_REPLY_TIMEOUT_SECS, DEFAULT_SWEEP_INTERVAL_SECS, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use settings::{
    SERVER_PORT, SettingKey, SettingType, SettingValue, Settings, SettingsBuilder, SettingsError,
};

/// Layered gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PROTOGATE")]
pub struct Config {
    /// Tracing filter expression applied to the gateway subscriber.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the gateway logs.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Seconds between two sweeps of abandoned one-shot waiters.
    #[ortho_config(default = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,
    /// Seconds a one-shot waiter may sit without consumers before it is swept.
    #[ortho_config(default = DEFAULT_IDLE_THRESHOLD_SECS)]
    pub idle_threshold_secs: u64,
    /// Default bound for synchronous reply waits.
    #[ortho_config(default = DEFAULT_REPLY_TIMEOUT_SECS)]
    pub reply_timeout_secs: u64,
    /// Jobs each per-protocol executor queues before submitters block.
    #[ortho_config(default = DEFAULT_EXECUTOR_BACKLOG)]
    pub executor_backlog: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            idle_threshold_secs: DEFAULT_IDLE_THRESHOLD_SECS,
            reply_timeout_secs: DEFAULT_REPLY_TIMEOUT_SECS,
            executor_backlog: DEFAULT_EXECUTOR_BACKLOG,
        }
    }
}

impl Config {
    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Interval between idle sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Idle threshold for one-shot waiters.
    #[must_use]
    pub const fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    /// Default reply timeout.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    /// Executor backlog.
    #[must_use]
    pub const fn executor_backlog(&self) -> usize {
        self.executor_backlog
    }

    /// Rejects values the gateway core cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroValue`] naming the first field that is zero.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroValue {
                field: "sweep_interval_secs",
            });
        }
        if self.idle_threshold_secs == 0 {
            return Err(ConfigError::ZeroValue {
                field: "idle_threshold_secs",
            });
        }
        if self.reply_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue {
                field: "reply_timeout_secs",
            });
        }
        if self.executor_backlog == 0 {
            return Err(ConfigError::ZeroValue {
                field: "executor_backlog",
            });
        }
        Ok(())
    }
}

/// Errors raised when a loaded configuration is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field that must be positive was zero.
    #[error("configuration field '{field}' must be greater than zero")]
    ZeroValue {
        /// Name of the offending field.
        field: &'static str,
    },
}
