//! Request and reply routing.
//!
//! On the way in, a request's opaque path is decoded into its target, the
//! cache gets a chance to answer it and the subscription registry records
//! who wants the answer. On the way back, the reply's resource identity is
//! resolved into the [`FanOut`] of every waiter owed a copy.


use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::ReplyCache;
use crate::identity::{AddressError, ResourceIdentity, TargetAddress};
use crate::message::{ErrorCode, Operation, Protocol, Reply, Request};
use crate::sequencer::Sequence;
use crate::subscriptions::{FanOut, SubscriptionRegistry};

pub(crate) const ROUTING_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::routing");

/// Errors raised while routing a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The request carries no path to decode.
    #[error("request has no target path")]
    MissingPath,
    /// The request path does not decode into a target.
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),
    /// The request needs a sequence it does not carry.
    #[error("{operation} request carries no sequence")]
    MissingSequence {
        /// Offending operation.
        operation: Operation,
    },
    /// Nobody is owed a copy of the reply.
    #[error("reply from {origin} for '{resource}' has no recipient")]
    Undeliverable {
        /// Protocol that produced the reply.
        origin: Protocol,
        /// Rendered resource identity, or `-` when it could not be rebuilt.
        resource: String,
    },
}

impl RoutingError {
    /// Error class reported to the waiter.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingPath | Self::InvalidAddress(_) => ErrorCode::InvalidAddress,
            Self::MissingSequence { .. } | Self::Undeliverable { .. } => ErrorCode::Internal,
        }
    }
}

/// Decision taken for an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestRoute {
    /// Hand the rewritten request to the client plugin of `target`.
    Forward {
        /// Target protocol.
        target: Protocol,
        /// Request with decoded routing headers.
        request: Request,
    },
    /// Answer from the cache without contacting any adapter.
    Cached {
        /// Cached reply stamped with the request's sequence.
        reply: Reply,
    },
    /// Nothing to forward: other listeners still hold the subscription.
    Suppressed,
}

/// Routing logic over the gateway's registry and cache.
pub struct RoutingStage<'a> {
    registry: &'a SubscriptionRegistry,
    cache: &'a dyn ReplyCache,
}

impl<'a> RoutingStage<'a> {
    /// Creates a stage borrowing the gateway's registry and cache.
    #[must_use]
    pub const fn new(registry: &'a SubscriptionRegistry, cache: &'a dyn ReplyCache) -> Self {
        Self { registry, cache }
    }

    /// Routes a request submitted by a server adapter of `source`.
    ///
    /// READ and OBSERVE register interest under the request's sequence;
    /// UNOBSERVE drops it and is suppressed while another listener still
    /// holds interest in the resource.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::MissingPath`] or
    /// [`RoutingError::InvalidAddress`] when the target cannot be decoded, and
    /// [`RoutingError::MissingSequence`] when the request was not sequenced.
    pub fn process_request(
        &self,
        source: &Protocol,
        mut request: Request,
    ) -> Result<RequestRoute, RoutingError> {
        let operation = request.operation();
        let sequence = request
            .sequence()
            .ok_or(RoutingError::MissingSequence { operation })?;
        let address = request
            .headers()
            .path()
            .ok_or(RoutingError::MissingPath)
            .and_then(|path| TargetAddress::decode(path).map_err(RoutingError::from))?;

        let headers = request.headers_mut();
        headers.set_target(address.authority());
        headers.set_path(address.path());
        let identity = address.identity();

        if operation.is_cacheable()
            && let Some(cached) = self.cache.lookup(operation, identity)
        {
            debug!(
                target: ROUTING_TARGET,
                identity = %identity,
                sequence = %sequence,
                "answered from cache"
            );
            return Ok(RequestRoute::Cached {
                reply: cached.with_sequence(sequence),
            });
        }

        match operation {
            Operation::Read | Operation::Observe => {
                self.registry.add(identity, source, sequence);
            }
            Operation::Unobserve => {
                let source_done = self.registry.remove(identity, source, sequence);
                if !source_done || self.registry.contains(identity) {
                    debug!(
                        target: ROUTING_TARGET,
                        identity = %identity,
                        sequence = %sequence,
                        "unobserve suppressed, listeners remain"
                    );
                    return Ok(RequestRoute::Suppressed);
                }
            }
            Operation::Create | Operation::Update | Operation::Delete => {}
        }

        debug!(
            target: ROUTING_TARGET,
            operation = %operation,
            identity = %identity,
            sequence = %sequence,
            target_protocol = %address.protocol(),
            "request routed"
        );
        Ok(RequestRoute::Forward {
            target: address.protocol().clone(),
            request,
        })
    }

    /// Resolves every waiter owed a copy of `reply` from `origin`.
    ///
    /// `direct` names the waiter of the sequence the reply answers, when that
    /// waiter is still registered. The reply is offered to the cache once its
    /// identity is known.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Undeliverable`] when nobody is owed the reply.
    pub fn process_reply(
        &self,
        origin: &Protocol,
        reply: &Reply,
        direct: Option<(Protocol, Sequence)>,
    ) -> Result<FanOut, RoutingError> {
        let identity = reply_identity(origin, reply);
        let mut fan_out = identity
            .as_ref()
            .and_then(|resource| self.registry.resolve(resource).ok())
            .unwrap_or_default();

        if let Some(resource) = &identity {
            self.cache.store(resource, origin, reply);
        }
        if let Some((protocol, sequence)) = direct {
            fan_out.insert(protocol, sequence);
        }

        if fan_out.is_empty() {
            return Err(RoutingError::Undeliverable {
                origin: origin.clone(),
                resource: identity.map_or_else(|| "-".to_owned(), |resource| resource.to_string()),
            });
        }
        debug!(
            target: ROUTING_TARGET,
            origin = %origin,
            protocols = fan_out.len(),
            "reply resolved"
        );
        Ok(fan_out)
    }
}

fn reply_identity(origin: &Protocol, reply: &Reply) -> Option<ResourceIdentity> {
    let headers = reply.headers();
    let (Some(authority), Some(path)) = (headers.target(), headers.path()) else {
        return None;
    };
    match ResourceIdentity::from_parts(origin, authority, path) {
        Ok(identity) => Some(identity),
        Err(error) => {
            warn!(
                target: ROUTING_TARGET,
                origin = %origin,
                error = %error,
                "reply address could not be rebuilt"
            );
            None
        }
    }
}
