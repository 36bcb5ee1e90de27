//! Routing, sequencing and reply-correlation core of the protogate IoT
//! protocol gateway.
//!
//! Protocol adapters plug into the gateway in two roles. A server-role
//! adapter accepts requests from the outside world and submits them through
//! a [`ServerLink`]; a client-role adapter receives routed requests for its
//! protocol and reports outcomes through a [`ReplyLink`]. The core in between
//! stays protocol-agnostic:
//!
//! - the [`Sequencer`] stamps every request with a correlation [`Sequence`];
//! - the [`ReplyStore`] keeps one waiter per sequence until it is answered,
//!   swept or unregistered;
//! - the [`SubscriptionRegistry`] records which protocols and sequences are
//!   owed a copy of each resource's replies;
//! - the [`RoutingStage`] decodes target paths, consults the [`ReplyCache`]
//!   and resolves reply fan-outs;
//! - the [`Gateway`] runs the pipelines and gives every protocol role its
//!   own executor thread, so a slow adapter never stalls another protocol.
//!
//! Every failure tied to a request travels back to its waiter as an
//! [`ErrorMessage`], through the same channel as a successful reply.
//!
//! ## Getting started
//!
//! [`bootstrap()`] loads the layered [`protogate_config::Config`], installs
//! structured telemetry and returns a [`GatewayBuilder`]. Register plugins on
//! the builder, then call [`GatewayBuilder::start`].

mod bootstrap;
mod cache;
mod clock;
mod dispatch;
mod executor;
mod health;
mod identity;
mod message;
mod plugin;
mod reply_store;
mod routing;
mod sequencer;
mod subscriptions;
pub mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap,
    bootstrap_with,
};
pub use cache::{NoCache, ReplyCache};
pub use clock::{Clock, SystemClock};
pub use dispatch::{Envelope, Gateway, GatewayBuilder, GatewayError, Stage, StageError};
pub use executor::ExecutorError;
pub use health::{HealthReporter, StructuredHealthReporter};
pub use identity::{AddressError, ResourceIdentity, TargetAddress};
pub use message::{
    ErrorCode, ErrorMessage, Headers, MAX_QOS, Message, Operation, Payload, Protocol, Reply,
    Request,
};
pub use plugin::{
    ClientPlugin, PluginError, PluginRole, PluginState, ReplyLink, ServerLink, ServerPlugin,
};
pub use reply_store::{
    HandleKind, PendingReply, ReplyHandle, ReplyListener, ReplyStore, SequenceCollision,
    Subscription, WaitError,
};
pub use routing::{RequestRoute, RoutingError, RoutingStage};
pub use sequencer::{Sequence, Sequencer};
pub use subscriptions::{FanOut, RegistryError, SubscriptionRegistry};
pub use telemetry::{TelemetryError, TelemetryHandle};
