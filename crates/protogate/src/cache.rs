//! Content cache extension point.
//!
//! The routing stage consults the cache before forwarding READ and OBSERVE
//! requests and offers every reply to it afterwards. Storage and eviction
//! belong to the strategy plugged into the gateway.

use crate::identity::ResourceIdentity;
use crate::message::{Operation, Protocol, Reply};

/// Pluggable reply cache keyed by canonical resource identity.
pub trait ReplyCache: Send + Sync {
    /// Returns a cached reply able to answer `operation` on `identity`.
    fn lookup(&self, operation: Operation, identity: &ResourceIdentity) -> Option<Reply>;

    /// Offers a fresh reply received from `protocol` for `identity`.
    fn store(&self, identity: &ResourceIdentity, protocol: &Protocol, reply: &Reply);
}

/// Strategy that never answers and never stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ReplyCache for NoCache {
    fn lookup(&self, _operation: Operation, _identity: &ResourceIdentity) -> Option<Reply> {
        None
    }

    fn store(&self, _identity: &ResourceIdentity, _protocol: &Protocol, _reply: &Reply) {}
}
