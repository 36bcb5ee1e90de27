//! Structured health reporting for gateway lifecycle events.

use std::sync::Arc;

use protogate_config::Config;

use crate::bootstrap::BootstrapError;
use crate::message::Protocol;
use crate::plugin::{PluginError, PluginRole};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked before a plugin is started.
    fn plugin_starting(&self, protocol: &Protocol, role: PluginRole);

    /// Invoked after a plugin starts successfully.
    fn plugin_started(&self, protocol: &Protocol, role: PluginRole);

    /// Invoked when a plugin fails to start.
    fn plugin_failed(&self, protocol: &Protocol, role: PluginRole, error: &PluginError);

    /// Invoked after a plugin has been stopped.
    fn plugin_stopped(&self, protocol: &Protocol, role: PluginRole);

    /// Invoked after each idle sweep with the number of cancelled waiters.
    fn sweep_completed(&self, swept: usize);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn plugin_starting(&self, protocol: &Protocol, role: PluginRole) {
        (**self).plugin_starting(protocol, role);
    }

    fn plugin_started(&self, protocol: &Protocol, role: PluginRole) {
        (**self).plugin_started(protocol, role);
    }

    fn plugin_failed(&self, protocol: &Protocol, role: PluginRole, error: &PluginError) {
        (**self).plugin_failed(protocol, role, error);
    }

    fn plugin_stopped(&self, protocol: &Protocol, role: PluginRole) {
        (**self).plugin_stopped(protocol, role);
    }

    fn sweep_completed(&self, swept: usize) {
        (**self).sweep_completed(swept);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting gateway bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            sweep_interval = ?config.sweep_interval(),
            idle_threshold = ?config.idle_threshold(),
            executor_backlog = config.executor_backlog(),
            "gateway bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "gateway bootstrap failed"
        );
    }

    fn plugin_starting(&self, protocol: &Protocol, role: PluginRole) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_starting",
            protocol = %protocol,
            role = %role,
            "starting plugin"
        );
    }

    fn plugin_started(&self, protocol: &Protocol, role: PluginRole) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_started",
            protocol = %protocol,
            role = %role,
            "plugin started"
        );
    }

    fn plugin_failed(&self, protocol: &Protocol, role: PluginRole, error: &PluginError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "plugin_failed",
            protocol = %protocol,
            role = %role,
            error = %error,
            "plugin failed to start"
        );
    }

    fn plugin_stopped(&self, protocol: &Protocol, role: PluginRole) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_stopped",
            protocol = %protocol,
            role = %role,
            "plugin stopped"
        );
    }

    fn sweep_completed(&self, swept: usize) {
        if swept > 0 {
            tracing::info!(
                target: HEALTH_TARGET,
                event = "sweep_completed",
                swept,
                "idle waiters cancelled"
            );
        } else {
            tracing::trace!(
                target: HEALTH_TARGET,
                event = "sweep_completed",
                "idle sweep found nothing"
            );
        }
    }
}
