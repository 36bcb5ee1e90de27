//! Layering behaviour of the gateway configuration loader.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use protogate_config::{Config, LogFormat};
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let previous = std::env::var_os(key);
        // Environment mutation is unsafe on edition 2024; the guard serialises it.
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

fn args(values: &[&str]) -> Vec<OsString> {
    values.iter().map(OsString::from).collect()
}

#[test]
fn cli_flags_override_defaults() {
    let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
    let config = Config::load_from_iter(args(&[
        "protogate",
        "--log-filter",
        "debug",
        "--executor-backlog",
        "8",
        "--idle-threshold-secs",
        "5",
    ]))
    .expect("configuration loads");

    assert_eq!(config.log_filter(), "debug");
    assert_eq!(config.executor_backlog(), 8);
    assert_eq!(config.idle_threshold(), Duration::from_secs(5));
    assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    assert_eq!(config.log_format(), LogFormat::Json);
}

#[test]
fn environment_overrides_defaults() {
    let _env = EnvOverride::set_var("PROTOGATE_SWEEP_INTERVAL_SECS", OsStr::new("15"));
    let config = Config::load_from_iter(args(&["protogate"])).expect("configuration loads");

    assert_eq!(config.sweep_interval(), Duration::from_secs(15));
    assert!(config.validate().is_ok());
}

fn config_file(dir: &TempDir, contents: &str) -> OsString {
    let path = dir.path().join("protogate.toml");
    fs::write(&path, contents).expect("write configuration file");
    path.into_os_string()
}

#[test]
fn configuration_file_is_layered_under_flags() {
    let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
    let dir = TempDir::new().expect("create temp dir");
    let path = config_file(
        &dir,
        "reply_timeout_secs = 5\nexecutor_backlog = 16\nlog_format = \"compact\"\n",
    );

    let mut cli = args(&["protogate", "--config-path"]);
    cli.push(path);
    cli.extend(args(&["--executor-backlog", "32"]));
    let config = Config::load_from_iter(cli).expect("configuration loads");

    assert_eq!(config.reply_timeout(), Duration::from_secs(5));
    assert_eq!(config.executor_backlog(), 32);
    assert_eq!(config.log_format(), LogFormat::Compact);
}
