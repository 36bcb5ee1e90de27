//! Error types for gateway assembly, lifecycle and submission.
//!
//! Failures that belong to a single request never surface here: they are
//! converted into an [`ErrorMessage`](crate::message::ErrorMessage) and
//! delivered to the request's waiter. `GatewayError` covers the cases where
//! there is no waiter to tell, or where the gateway itself cannot proceed.

use thiserror::Error;

use protogate_config::ConfigError;

use crate::executor::ExecutorError;
use crate::message::{Operation, Protocol};
use crate::plugin::{PluginError, PluginRole};
use crate::reply_store::SequenceCollision;
use crate::sequencer::Sequence;

/// Errors surfaced by the gateway builder, the running gateway and links.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A plugin for the same protocol and role is already registered.
    #[error("a {role} plugin for '{protocol}' is already registered")]
    DuplicatePlugin {
        /// Protocol served by both plugins.
        protocol: Protocol,
        /// Role registered twice.
        role: PluginRole,
    },
    /// The plugin reported an empty protocol name.
    #[error("plugin reports an empty protocol name")]
    InvalidProtocol,
    /// The configuration cannot drive the gateway core.
    #[error("invalid gateway configuration: {0}")]
    Config(#[from] ConfigError),
    /// The sequence chosen for a request is still in use.
    #[error(transparent)]
    SequenceCollision(#[from] SequenceCollision),
    /// The request needs a caller-supplied sequence.
    #[error("{operation} request carries no sequence")]
    MissingSequence {
        /// Offending operation.
        operation: Operation,
    },
    /// An UNOBSERVE names a subscription registered by another protocol.
    #[error("subscription {sequence} belongs to '{owner}'")]
    ForeignSubscription {
        /// Sequence carried by the request.
        sequence: Sequence,
        /// Protocol that registered the subscription.
        owner: Protocol,
    },
    /// The gateway no longer accepts requests.
    #[error("gateway is stopped")]
    Stopped,
    /// A plugin failed to start; startup was rolled back.
    #[error("{role} plugin for '{protocol}' failed to start: {source}")]
    PluginStart {
        /// Protocol served by the plugin.
        protocol: Protocol,
        /// Role of the plugin.
        role: PluginRole,
        /// Failure reported by the plugin.
        #[source]
        source: PluginError,
    },
    /// An executor thread could not be started.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl GatewayError {
    pub(crate) const fn duplicate(protocol: Protocol, role: PluginRole) -> Self {
        Self::DuplicatePlugin { protocol, role }
    }

    pub(crate) const fn plugin_start(
        protocol: Protocol,
        role: PluginRole,
        source: PluginError,
    ) -> Self {
        Self::PluginStart {
            protocol,
            role,
            source,
        }
    }
}
