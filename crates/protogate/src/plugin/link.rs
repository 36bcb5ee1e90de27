//! Handles through which plugins talk back to the gateway.
//!
//! Links hold a weak reference to the gateway core. Once the gateway has
//! been dropped, submissions fail with [`GatewayError::Stopped`] and reports
//! are discarded with a log line.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::debug;

use crate::dispatch::{Core, DISPATCH_TARGET, GatewayError};
use crate::message::{ErrorMessage, Protocol, Reply, Request};
use crate::reply_store::{ReplyHandle, ReplyListener, WaitError};
use crate::sequencer::Sequence;

/// Link handed to a client-role plugin for reporting outcomes.
#[derive(Clone)]
pub struct ReplyLink {
    core: Weak<Core>,
    protocol: Protocol,
}

impl ReplyLink {
    pub(crate) fn new(core: &Arc<Core>, protocol: Protocol) -> Self {
        Self {
            core: Arc::downgrade(core),
            protocol,
        }
    }

    /// Protocol the link reports for.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Confirms a request that produced no data.
    pub fn ack(&self, sequence: Sequence) {
        if let Some(core) = self.upgrade("ack") {
            core.acknowledge(&self.protocol, sequence);
        }
    }

    /// Reports a reply from a device, either answering a request (sequenced)
    /// or notifying about a resource (unsequenced).
    pub fn deliver(&self, reply: Reply) {
        if let Some(core) = self.upgrade("reply") {
            core.handle_reply(&self.protocol, reply);
        }
    }

    /// Reports that a request failed.
    pub fn error(&self, error: ErrorMessage) {
        if let Some(core) = self.upgrade("error") {
            core.fail(&error);
        }
    }

    fn upgrade(&self, kind: &'static str) -> Option<Arc<Core>> {
        let core = self.core.upgrade();
        if core.is_none() {
            debug!(
                target: DISPATCH_TARGET,
                protocol = %self.protocol,
                kind,
                "gateway gone, report dropped"
            );
        }
        core
    }
}

/// Link handed to a server-role plugin for submitting requests.
#[derive(Clone)]
pub struct ServerLink {
    core: Weak<Core>,
    protocol: Protocol,
}

impl ServerLink {
    pub(crate) fn new(core: &Arc<Core>, protocol: Protocol) -> Self {
        Self {
            core: Arc::downgrade(core),
            protocol,
        }
    }

    /// Protocol the link submits for.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Submits a request.
    ///
    /// CREATE, READ, UPDATE and DELETE return a single-reply handle. OBSERVE
    /// returns a subscription handle, unless it was pre-stamped with
    /// [`Sequence::UNCORRELATED`]: notifications then arrive through
    /// [`ServerPlugin::notify`](super::ServerPlugin::notify). UNOBSERVE must
    /// carry the subscription's sequence and returns nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Stopped`] once the gateway is stopped,
    /// [`GatewayError::MissingSequence`] for an unsequenced UNOBSERVE and
    /// [`GatewayError::SequenceCollision`] if the waiter cannot be registered.
    /// Routing failures are delivered to the returned handle instead.
    pub fn submit(&self, request: Request) -> Result<Option<ReplyHandle>, GatewayError> {
        self.core
            .upgrade()
            .ok_or(GatewayError::Stopped)?
            .submit(&self.protocol, request)
    }

    /// Feeds every future notification of subscription `sequence` to
    /// `listener` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError`] when the subscription is unknown, is not a
    /// subscription or the listener cannot start.
    pub fn subscribe(
        &self,
        sequence: Sequence,
        listener: Arc<dyn ReplyListener>,
    ) -> Result<(), WaitError> {
        match self.core.upgrade() {
            Some(core) => core.replies().subscribe(sequence, listener),
            None => Err(WaitError::Closed { sequence }),
        }
    }

    /// Default bound for synchronous waits.
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        self.core
            .upgrade()
            .map_or(Duration::ZERO, |core| core.reply_timeout())
    }
}
