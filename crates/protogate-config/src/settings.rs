//! Per-plugin settings snapshots.
//!
//! Adapters are configured through typed [`SettingKey`]s while the gateway is
//! still being assembled. [`SettingsBuilder::build`] freezes the values into a
//! [`Settings`] snapshot that is cheap to clone and offers no mutation API, so
//! a running plugin can never observe a setting change underneath it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

/// Raw value stored for a setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    /// Signed integer value.
    Integer(i64),
    /// Free-form text value.
    Text(String),
    /// Boolean flag.
    Flag(bool),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Flag(value) => write!(f, "{value}"),
        }
    }
}

/// Conversion between a Rust type and the stored [`SettingValue`].
pub trait SettingType: Sized {
    /// Converts the typed value into its stored representation.
    fn into_value(self) -> SettingValue;

    /// Reads a typed value back, returning `None` on a type mismatch.
    fn from_value(value: &SettingValue) -> Option<Self>;
}

macro_rules! integer_setting {
    ($($ty:ty),*) => {
        $(
            impl SettingType for $ty {
                fn into_value(self) -> SettingValue {
                    SettingValue::Integer(i64::from(self))
                }

                fn from_value(value: &SettingValue) -> Option<Self> {
                    match value {
                        SettingValue::Integer(raw) => Self::try_from(*raw).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

integer_setting!(u16, u32, i32, i64);

impl SettingType for bool {
    fn into_value(self) -> SettingValue {
        SettingValue::Flag(self)
    }

    fn from_value(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }
}

impl SettingType for String {
    fn into_value(self) -> SettingValue {
        SettingValue::Text(self)
    }

    fn from_value(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Text(text) => Some(text.clone()),
            _ => None,
        }
    }
}

/// Typed key with an attached validation rule.
pub struct SettingKey<T> {
    name: &'static str,
    validator: fn(&T) -> bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SettingKey<T> {
    /// Declares a key. The validator runs on every write.
    #[must_use]
    pub const fn new(name: &'static str, validator: fn(&T) -> bool) -> Self {
        Self {
            name,
            validator,
            _marker: PhantomData,
        }
    }

    /// Dotted key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    fn accepts(&self, value: &T) -> bool {
        (self.validator)(value)
    }
}

impl<T> fmt::Debug for SettingKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingKey").field("name", &self.name).finish()
    }
}

const fn positive_port(port: &u16) -> bool {
    *port > 0
}

/// Listening port of a server-role adapter.
pub const SERVER_PORT: SettingKey<u16> = SettingKey::new("server.port", positive_port);

/// Errors raised while assembling a [`Settings`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// The key was never registered with the builder.
    #[error("the key '{name}' is not registered")]
    UnknownKey {
        /// Key name.
        name: String,
    },
    /// A key with the same name is already registered.
    #[error("the key '{name}' is already registered")]
    DuplicateKey {
        /// Key name.
        name: String,
    },
    /// The value was rejected by the key's validator.
    #[error("value `{value}` rejected for key '{name}'")]
    InvalidValue {
        /// Key name.
        name: String,
        /// Rendered rejected value.
        value: String,
    },
}

/// Mutable staging area for a plugin's settings.
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    known: BTreeSet<&'static str>,
    values: BTreeMap<&'static str, SettingValue>,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        let mut known = BTreeSet::new();
        known.insert(SERVER_PORT.name());
        Self {
            known,
            values: BTreeMap::new(),
        }
    }
}

impl SettingsBuilder {
    /// Creates a builder that knows the global keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin-local key.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::DuplicateKey`] if the name is already known,
    /// including names of global keys.
    pub fn register_key<T>(&mut self, key: &SettingKey<T>) -> Result<&mut Self, SettingsError> {
        if !self.known.insert(key.name()) {
            return Err(SettingsError::DuplicateKey {
                name: key.name().to_owned(),
            });
        }
        Ok(self)
    }

    /// Stores a value after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::UnknownKey`] for unregistered keys and
    /// [`SettingsError::InvalidValue`] when the validator rejects the value.
    pub fn set<T>(&mut self, key: &SettingKey<T>, value: T) -> Result<&mut Self, SettingsError>
    where
        T: SettingType,
    {
        if !self.known.contains(key.name()) {
            return Err(SettingsError::UnknownKey {
                name: key.name().to_owned(),
            });
        }
        if !key.accepts(&value) {
            return Err(SettingsError::InvalidValue {
                name: key.name().to_owned(),
                value: value.into_value().to_string(),
            });
        }
        self.values.insert(key.name(), value.into_value());
        Ok(self)
    }

    /// Freezes the staged values.
    #[must_use]
    pub fn build(self) -> Settings {
        Settings {
            values: Arc::new(self.values),
        }
    }
}

/// Immutable settings snapshot handed to a plugin at start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: Arc<BTreeMap<&'static str, SettingValue>>,
}

impl Settings {
    /// Empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads a typed value.
    #[must_use]
    pub fn get<T>(&self, key: &SettingKey<T>) -> Option<T>
    where
        T: SettingType,
    {
        self.values.get(key.name()).and_then(T::from_value)
    }

    /// Listening port, when configured.
    #[must_use]
    pub fn server_port(&self) -> Option<u16> {
        self.get(&SERVER_PORT)
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn any_text(_: &String) -> bool {
        true
    }

    const BROKER_CLIENT_ID: SettingKey<String> = SettingKey::new("mqtt.client_id", any_text);

    #[test]
    fn stores_and_reads_server_port() {
        let mut builder = SettingsBuilder::new();
        builder.set(&SERVER_PORT, 8080).expect("set port");
        let settings = builder.build();
        assert_eq!(settings.server_port(), Some(8080));
        assert_eq!(settings.len(), 1);
    }

    #[test]
    fn rejects_zero_port() {
        let mut builder = SettingsBuilder::new();
        let error = builder
            .set(&SERVER_PORT, 0)
            .expect_err("port zero must be rejected");
        assert!(matches!(error, SettingsError::InvalidValue { .. }));
        assert!(error.to_string().contains("server.port"));
    }

    #[test]
    fn rejects_unregistered_local_key() {
        let mut builder = SettingsBuilder::new();
        let error = builder
            .set(&BROKER_CLIENT_ID, "gw".to_owned())
            .expect_err("unknown key");
        assert!(matches!(error, SettingsError::UnknownKey { .. }));
    }

    #[test]
    fn registered_local_key_round_trips() {
        let mut builder = SettingsBuilder::new();
        builder
            .register_key(&BROKER_CLIENT_ID)
            .expect("register key")
            .set(&BROKER_CLIENT_ID, "gateway-1".to_owned())
            .expect("set value");
        let settings = builder.build();
        assert_eq!(
            settings.get(&BROKER_CLIENT_ID).as_deref(),
            Some("gateway-1")
        );
    }

    #[test]
    fn local_key_cannot_shadow_global_key() {
        const SHADOW: SettingKey<u16> = SettingKey::new("server.port", positive_port);
        let mut builder = SettingsBuilder::new();
        let error = builder.register_key(&SHADOW).expect_err("duplicate");
        assert!(matches!(error, SettingsError::DuplicateKey { .. }));
    }

    #[test]
    fn snapshot_clones_share_values() {
        let mut builder = SettingsBuilder::new();
        builder.set(&SERVER_PORT, 1883).expect("set port");
        let settings = builder.build();
        let copy = settings.clone();
        assert_eq!(copy, settings);
        assert_eq!(copy.server_port(), Some(1883));
        assert!(Settings::empty().is_empty());
    }
}
