//! Default values shared by the configuration loader and the gateway core.
//!
//! The sweep and idle constants are operational tuning knobs rather than
//! protocol requirements, so every one of them can be overridden through the
//! layered [`Config`](crate::Config).

/// Default log filter expression used by the gateway.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Interval between two sweeps of abandoned one-shot waiters, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Idle time after which a one-shot waiter without consumers is cancelled.
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 40;

/// Default bound applied by adapters that wait synchronously for a reply.
pub const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 60;

/// Number of queued jobs each per-protocol executor accepts before submitters block.
pub const DEFAULT_EXECUTOR_BACKLOG: usize = 1024;

/// Default log filter expression used by the gateway.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
