//! Gateway bootstrap: configuration, telemetry and a ready builder.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use protogate_config::{Config, ConfigError};

use crate::dispatch::GatewayBuilder;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::telemetry::{self, TelemetryError};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when no configuration can be assembled.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`], layering defaults, files,
/// environment and command-line flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a fixed configuration, for embedding and tests.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader(Config);

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self(config)
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.0.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but cannot drive the gateway.
    #[error("unusable configuration: {source}")]
    Invalid {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Loads configuration through `loader`, initialises telemetry and returns a
/// builder wired to `reporter`, ready for plugin registration.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration cannot be loaded or
/// validated, or when telemetry cannot be installed. Every failure is also
/// reported through `reporter`.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<GatewayBuilder, BootstrapError> {
    reporter.bootstrap_starting();

    let outcome = load_and_prepare(loader);
    match outcome {
        Ok(config) => {
            reporter.bootstrap_succeeded(&config);
            Ok(GatewayBuilder::new(&config).with_reporter(reporter))
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

/// Bootstraps with the system loader and the tracing-backed reporter.
///
/// # Errors
///
/// See [`bootstrap_with`].
pub fn bootstrap() -> Result<GatewayBuilder, BootstrapError> {
    bootstrap_with(&SystemConfigLoader, Arc::new(StructuredHealthReporter::new()))
}

fn load_and_prepare(loader: &dyn ConfigLoader) -> Result<Config, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    config
        .validate()
        .map_err(|source| BootstrapError::Invalid { source })?;
    telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use parking_lot::Mutex;

    use super::*;
    use crate::message::Protocol;
    use crate::plugin::{PluginError, PluginRole};

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<String>>,
    }

    impl HealthReporter for RecordingReporter {
        fn bootstrap_starting(&self) {
            self.events.lock().push("starting".to_owned());
        }

        fn bootstrap_succeeded(&self, _config: &Config) {
            self.events.lock().push("succeeded".to_owned());
        }

        fn bootstrap_failed(&self, error: &BootstrapError) {
            self.events.lock().push(format!("failed: {error}"));
        }

        fn plugin_starting(&self, _protocol: &Protocol, _role: PluginRole) {}

        fn plugin_started(&self, _protocol: &Protocol, _role: PluginRole) {}

        fn plugin_failed(&self, _protocol: &Protocol, _role: PluginRole, _error: &PluginError) {}

        fn plugin_stopped(&self, _protocol: &Protocol, _role: PluginRole) {}

        fn sweep_completed(&self, _swept: usize) {}
    }

    struct FailingConfigLoader;

    impl ConfigLoader for FailingConfigLoader {
        fn load(&self) -> Result<Config, Arc<OrthoError>> {
            Config::load_from_iter([
                OsString::from("protogate"),
                OsString::from("--log-format"),
                OsString::from("yaml"),
            ])
        }
    }

    #[test]
    fn static_configuration_yields_a_builder() {
        let reporter = Arc::new(RecordingReporter::default());
        let loader = StaticConfigLoader::new(Config::default());

        let builder = bootstrap_with(&loader, reporter.clone());

        assert!(builder.is_ok());
        assert_eq!(*reporter.events.lock(), ["starting", "succeeded"]);
    }

    #[test]
    fn loader_failure_is_reported() {
        let reporter = Arc::new(RecordingReporter::default());

        let error = bootstrap_with(&FailingConfigLoader, reporter.clone())
            .err()
            .expect("bootstrap fails");

        assert!(matches!(error, BootstrapError::Configuration { .. }));
        let events = reporter.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert!(events.last().is_some_and(|event| event.starts_with("failed")));
    }

    #[test]
    fn zero_backlog_is_rejected() {
        let reporter = Arc::new(RecordingReporter::default());
        let loader = StaticConfigLoader::new(Config {
            executor_backlog: 0,
            ..Config::default()
        });

        let error = bootstrap_with(&loader, reporter)
            .err()
            .expect("bootstrap fails");

        assert!(matches!(
            error,
            BootstrapError::Invalid {
                source: ConfigError::ZeroValue {
                    field: "executor_backlog"
                }
            }
        ));
    }
}
