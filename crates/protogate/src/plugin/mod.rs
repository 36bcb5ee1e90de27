//! Contracts between the gateway and its protocol adapters.
//!
//! A protocol is served by up to two plugins. The client-role plugin talks
//! to devices: it receives routed requests and reports outcomes through its
//! [`ReplyLink`]. The server-role plugin faces the outside world: it submits
//! requests through its [`ServerLink`] and receives out-of-band
//! notifications for permanent interests.

mod link;
mod registry;

use strum::Display;
use thiserror::Error;

use protogate_config::Settings;

use crate::message::{ErrorCode, Protocol, Reply, Request};

pub use self::link::{ReplyLink, ServerLink};
pub(crate) use self::registry::{PluginRecord, PluginTable, RoleSlot};

/// Role a plugin plays for its protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PluginRole {
    /// Sends requests to devices.
    Client,
    /// Accepts requests from the outside world.
    Server,
}

/// Lifecycle of a registered protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PluginState {
    /// Registered, not yet started.
    Registered,
    /// Plugins started and executors running.
    Started,
    /// Shutdown in progress.
    Stopping,
    /// Plugins stopped and executors drained.
    Stopped,
}

/// Failures reported by plugins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The plugin could not start.
    #[error("failed to start: {message}")]
    Start {
        /// Human-readable failure description.
        message: String,
    },
    /// The addressed device could not be reached.
    #[error("target not reachable: {message}")]
    TargetNotFound {
        /// Human-readable failure description.
        message: String,
    },
    /// Any other adapter failure.
    #[error("adapter failure: {message}")]
    Internal {
        /// Human-readable failure description.
        message: String,
    },
}

impl PluginError {
    /// Creates a start failure.
    pub fn start(message: impl Into<String>) -> Self {
        Self::Start {
            message: message.into(),
        }
    }

    /// Creates a connectivity failure.
    pub fn target_not_found(message: impl Into<String>) -> Self {
        Self::TargetNotFound {
            message: message.into(),
        }
    }

    /// Creates a generic adapter failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error class reported to the waiter of a failed request.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::TargetNotFound { .. } => ErrorCode::TargetNotFound,
            Self::Start { .. } | Self::Internal { .. } => ErrorCode::Internal,
        }
    }
}

/// Adapter that forwards routed requests to devices.
pub trait ClientPlugin: Send + Sync {
    /// Protocol served by the plugin.
    fn protocol(&self) -> Protocol;

    /// Starts the adapter. Must return promptly; long-running work belongs
    /// on the adapter's own threads.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the adapter cannot start; gateway startup
    /// is then aborted.
    fn start(&self, link: ReplyLink, settings: &Settings) -> Result<(), PluginError>;

    /// Sends a routed request to its device. Exactly one reply, ack or error
    /// must later be reported through the [`ReplyLink`] for the request's
    /// sequence.
    ///
    /// # Errors
    ///
    /// An error returned here is delivered to the request's waiter.
    fn handle_request(&self, request: Request) -> Result<(), PluginError>;

    /// Stops the adapter.
    fn stop(&self) {}
}

/// Adapter that accepts requests from the outside world.
pub trait ServerPlugin: Send + Sync {
    /// Protocol served by the plugin.
    fn protocol(&self) -> Protocol;

    /// Starts the adapter. Must return promptly.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the adapter cannot start; gateway startup
    /// is then aborted.
    fn start(&self, link: ServerLink, settings: &Settings) -> Result<(), PluginError>;

    /// Receives a notification owed to the protocol's permanent interest.
    fn notify(&self, reply: Reply) {
        drop(reply);
    }

    /// Stops the adapter.
    fn stop(&self) {}
}
