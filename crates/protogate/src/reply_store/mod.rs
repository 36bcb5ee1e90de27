//! Correlation table of pending operations.
//!
//! Every submitted request owns an entry keyed by its [`Sequence`] until it
//! is answered. Single-shot entries leave the table on completion, error,
//! explicit unregistration or an idle sweep. Subscription entries stay until
//! they are unregistered or fail, and fan every delivery out to their
//! waiters and listeners in order.

mod handle;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::message::{ErrorMessage, Protocol, Reply};
use crate::sequencer::Sequence;

use self::handle::{OneShot, Repeating};
pub use self::handle::{PendingReply, ReplyHandle, ReplyListener, Subscription};

pub(crate) const REPLY_STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reply_store");

/// Flavour of waiter to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Expects exactly one reply.
    OneShot,
    /// Expects every future reply until unregistered.
    Repeating,
}

/// Failures observed by a caller waiting for a reply.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The request was answered with an error.
    #[error("request failed: {0}")]
    Failed(ErrorMessage),
    /// Nothing arrived before the deadline. The entry stays registered.
    #[error("timed out after {timeout:?} waiting for sequence {sequence}")]
    Timeout {
        /// Awaited sequence.
        sequence: Sequence,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The waiter was swept or unregistered before an answer arrived.
    #[error("waiter for sequence {sequence} was cancelled")]
    Cancelled {
        /// Awaited sequence.
        sequence: Sequence,
    },
    /// The single reply was already taken by another call.
    #[error("reply for sequence {sequence} was already consumed")]
    Consumed {
        /// Awaited sequence.
        sequence: Sequence,
    },
    /// The subscription was unregistered or terminated.
    #[error("subscription {sequence} is closed")]
    Closed {
        /// Subscription sequence.
        sequence: Sequence,
    },
    /// No entry is registered under the sequence.
    #[error("no waiter registered for sequence {sequence}")]
    Unknown {
        /// Requested sequence.
        sequence: Sequence,
    },
    /// The operation requires a subscription entry.
    #[error("sequence {sequence} is not a subscription")]
    NotRepeating {
        /// Requested sequence.
        sequence: Sequence,
    },
    /// The listener thread could not be started.
    #[error("failed to spawn listener for sequence {sequence}: {source}")]
    ListenerSpawn {
        /// Subscription sequence.
        sequence: Sequence,
        /// Underlying spawn failure.
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Registering a sequence that is still live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sequence {sequence} is already registered")]
pub struct SequenceCollision {
    /// Colliding sequence.
    pub sequence: Sequence,
}

#[derive(Debug, Clone)]
enum Slot {
    OneShot(Arc<OneShot>),
    Repeating(Arc<Repeating>),
}

#[derive(Debug, Clone)]
struct Waiter {
    origin: Protocol,
    slot: Slot,
}

/// Concurrent table of pending replies.
#[derive(Debug)]
pub struct ReplyStore {
    entries: DashMap<Sequence, Waiter>,
    clock: Arc<dyn Clock>,
    idle_threshold: Duration,
}

impl ReplyStore {
    /// Creates a store that sweeps single-shot waiters left idle for longer
    /// than `idle_threshold`.
    #[must_use]
    pub fn new(idle_threshold: Duration) -> Self {
        Self::with_clock(idle_threshold, Arc::new(SystemClock))
    }

    /// Creates a store reading idle time from `clock`.
    #[must_use]
    pub fn with_clock(idle_threshold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            idle_threshold,
        }
    }

    /// Registers a waiter for `sequence` on behalf of `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceCollision`] when the sequence is still registered.
    pub fn register(
        &self,
        sequence: Sequence,
        kind: HandleKind,
        origin: Protocol,
    ) -> Result<ReplyHandle, SequenceCollision> {
        match self.entries.entry(sequence) {
            Entry::Occupied(_) => {
                tracing::error!(
                    target: REPLY_STORE_TARGET,
                    sequence = %sequence,
                    "sequence collision"
                );
                Err(SequenceCollision { sequence })
            }
            Entry::Vacant(vacant) => {
                let (slot, handle) = match kind {
                    HandleKind::OneShot => {
                        let inner = Arc::new(OneShot::new(sequence, Arc::clone(&self.clock)));
                        let handle = ReplyHandle::Single(PendingReply::new(Arc::clone(&inner)));
                        (Slot::OneShot(inner), handle)
                    }
                    HandleKind::Repeating => {
                        let (inner, receiver) = Repeating::new(sequence);
                        let handle =
                            ReplyHandle::Subscription(Subscription::new(sequence, receiver));
                        (Slot::Repeating(Arc::new(inner)), handle)
                    }
                };
                vacant.insert(Waiter { origin, slot });
                debug!(
                    target: REPLY_STORE_TARGET,
                    sequence = %sequence,
                    kind = ?kind,
                    "waiter registered"
                );
                Ok(handle)
            }
        }
    }

    /// Delivers `reply` to the waiter at `sequence`.
    ///
    /// Single-shot entries are removed; subscription entries stay. Returns
    /// `false` and logs a correlation miss when nothing was delivered.
    pub fn complete(&self, sequence: Sequence, reply: Reply) -> bool {
        let delivered = match self.slot(sequence) {
            Some(Slot::OneShot(inner)) => {
                self.entries.remove(&sequence);
                inner.fulfil(Ok(reply))
            }
            Some(Slot::Repeating(inner)) => inner.deliver(&Ok(reply)),
            None => false,
        };
        if !delivered {
            correlation_miss(sequence, "reply");
        }
        delivered
    }

    /// Delivers `error` to the waiter at its sequence and removes the entry,
    /// whatever its kind.
    pub fn complete_with_error(&self, error: ErrorMessage) -> bool {
        let sequence = error.sequence();
        let delivered = match self.entries.remove(&sequence).map(|(_, waiter)| waiter.slot) {
            Some(Slot::OneShot(inner)) => inner.fulfil(Err(error)),
            Some(Slot::Repeating(inner)) => inner.deliver(&Err(error)),
            None => false,
        };
        if !delivered {
            correlation_miss(sequence, "error");
        }
        delivered
    }

    /// Acknowledges `sequence` without data.
    ///
    /// A single-shot waiter receives an empty reply. On a subscription the
    /// acknowledgement only confirms the registration and delivers nothing.
    pub fn acknowledge(&self, sequence: Sequence) -> bool {
        match self.slot(sequence) {
            Some(Slot::OneShot(_)) => self.complete(sequence, Reply::empty(sequence)),
            Some(Slot::Repeating(_)) => {
                debug!(
                    target: REPLY_STORE_TARGET,
                    sequence = %sequence,
                    "subscription acknowledged"
                );
                true
            }
            None => {
                correlation_miss(sequence, "ack");
                false
            }
        }
    }

    /// Removes the entry at `sequence`.
    ///
    /// Pending single-shot waiters observe [`WaitError::Cancelled`];
    /// subscription waiters and listeners observe [`WaitError::Closed`].
    pub fn unregister(&self, sequence: Sequence) -> bool {
        match self.entries.remove(&sequence).map(|(_, waiter)| waiter.slot) {
            Some(Slot::OneShot(inner)) => {
                inner.cancel();
                true
            }
            Some(Slot::Repeating(inner)) => {
                inner.close();
                true
            }
            None => false,
        }
    }

    /// Waits on a registered entry.
    ///
    /// On a single-shot entry this takes its only reply. On a subscription it
    /// returns the first value delivered after the call; earlier values are
    /// not replayed.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Unknown`] when nothing is registered under
    /// `sequence`, plus the errors of [`PendingReply::wait`] and
    /// [`Subscription::next_reply`].
    pub fn wait(&self, sequence: Sequence, timeout: Duration) -> Result<Reply, WaitError> {
        match self.slot(sequence) {
            Some(Slot::OneShot(inner)) => PendingReply::new(inner).wait(timeout),
            Some(Slot::Repeating(inner)) => inner.wait_next(timeout),
            None => Err(WaitError::Unknown { sequence }),
        }
    }

    /// Waits on a registered entry with no deadline.
    ///
    /// # Errors
    ///
    /// As [`ReplyStore::wait`], except that it never times out.
    pub fn wait_forever(&self, sequence: Sequence) -> Result<Reply, WaitError> {
        match self.slot(sequence) {
            Some(Slot::OneShot(inner)) => PendingReply::new(inner).wait_forever(),
            Some(Slot::Repeating(inner)) => inner.wait_next(Duration::MAX),
            None => Err(WaitError::Unknown { sequence }),
        }
    }

    /// Feeds every future delivery on subscription `sequence` to `listener`
    /// from a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Unknown`] for unregistered sequences,
    /// [`WaitError::NotRepeating`] for single-shot entries and
    /// [`WaitError::ListenerSpawn`] when the thread cannot start.
    pub fn subscribe(
        &self,
        sequence: Sequence,
        listener: Arc<dyn ReplyListener>,
    ) -> Result<(), WaitError> {
        match self.slot(sequence) {
            Some(Slot::Repeating(inner)) => inner.spawn_listener(listener),
            Some(Slot::OneShot(_)) => Err(WaitError::NotRepeating { sequence }),
            None => Err(WaitError::Unknown { sequence }),
        }
    }

    /// Protocol that registered `sequence`.
    #[must_use]
    pub fn origin(&self, sequence: Sequence) -> Option<Protocol> {
        self.entries.get(&sequence).map(|waiter| waiter.origin.clone())
    }

    /// Whether `sequence` is registered.
    #[must_use]
    pub fn contains(&self, sequence: Sequence) -> bool {
        self.entries.contains_key(&sequence)
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cancels and removes single-shot waiters nobody attached to for longer
    /// than the idle threshold. Subscriptions are never swept.
    ///
    /// Returns the removed sequences so callers can purge other references.
    pub fn sweep_idle(&self) -> Vec<Sequence> {
        let threshold = self.idle_threshold;
        let candidates: Vec<Sequence> = self
            .entries
            .iter()
            .filter(|entry| matches!(&entry.slot, Slot::OneShot(inner) if inner.is_idle(threshold)))
            .map(|entry| *entry.key())
            .collect();

        let mut swept = Vec::with_capacity(candidates.len());
        for sequence in candidates {
            let removed = self.entries.remove_if(&sequence, |_, waiter| {
                matches!(&waiter.slot, Slot::OneShot(inner) if inner.is_idle(threshold))
            });
            if let Some((_, Waiter { slot: Slot::OneShot(inner), .. })) = removed {
                inner.cancel();
                swept.push(sequence);
            }
        }
        if !swept.is_empty() {
            debug!(
                target: REPLY_STORE_TARGET,
                count = swept.len(),
                "swept idle waiters"
            );
        }
        swept
    }

    fn slot(&self, sequence: Sequence) -> Option<Slot> {
        self.entries.get(&sequence).map(|waiter| waiter.slot.clone())
    }
}

fn correlation_miss(sequence: Sequence, kind: &'static str) {
    warn!(
        target: REPLY_STORE_TARGET,
        sequence = %sequence,
        kind,
        "correlation miss"
    );
}
