//! Dispatch orchestration for the gateway.
//!
//! The orchestrator ties the sequencer, the reply store, the subscription
//! registry and the routing stage to the registered protocol plugins.
//!
//! ## Request path
//!
//! A server plugin submits a request through its
//! [`ServerLink`](crate::plugin::ServerLink). The request is sequenced, its
//! waiter registered, and it then runs through the input stages, the routing
//! stage and the output stages before being queued on the target protocol's
//! client executor.
//!
//! ## Reply path
//!
//! A client plugin reports a reply, acknowledgement or error through its
//! [`ReplyLink`](crate::plugin::ReplyLink). Replies are resolved into a fan-out
//! and one delivery job per recipient protocol is queued on that protocol's
//! server executor.
//!
//! ## Failures
//!
//! Stage, routing and plugin failures for a correlated message become an
//! [`ErrorMessage`](crate::message::ErrorMessage) delivered to its waiter.

mod errors;
mod gateway;
mod pipeline;
mod stage;


pub use self::errors::GatewayError;
pub use self::gateway::{Gateway, GatewayBuilder};
pub(crate) use self::pipeline::Core;
pub use self::stage::{Envelope, Stage, StageError};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
