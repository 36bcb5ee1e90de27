//! Awaitable handles held by the reply store and handed to server adapters.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{REPLY_STORE_TARGET, WaitError};
use crate::clock::{Clock, elapsed_since};
use crate::message::{ErrorMessage, Reply};
use crate::sequencer::Sequence;

pub(crate) type Outcome = Result<Reply, ErrorMessage>;

/// Receives every value delivered to a subscription without blocking the
/// caller that registered it.
pub trait ReplyListener: Send + Sync {
    /// Called once per delivered reply, in delivery order.
    fn on_reply(&self, reply: Reply);

    /// Called when the subscription fails. No further calls follow.
    fn on_error(&self, error: ErrorMessage);
}

#[derive(Debug)]
struct OneShotState {
    outcome: Option<Outcome>,
    taken: bool,
    cancelled: bool,
    waiters: usize,
    last_attached: Instant,
}

/// Single-reply slot with idle bookkeeping.
#[derive(Debug)]
pub(crate) struct OneShot {
    sequence: Sequence,
    state: Mutex<OneShotState>,
    ready: Condvar,
    clock: Arc<dyn Clock>,
}

impl OneShot {
    pub(crate) fn new(sequence: Sequence, clock: Arc<dyn Clock>) -> Self {
        let last_attached = clock.now();
        Self {
            sequence,
            state: Mutex::new(OneShotState {
                outcome: None,
                taken: false,
                cancelled: false,
                waiters: 0,
                last_attached,
            }),
            ready: Condvar::new(),
            clock,
        }
    }

    /// Stores the outcome unless one was already stored or the slot was
    /// cancelled.
    pub(crate) fn fulfil(&self, outcome: Outcome) -> bool {
        let mut state = self.state.lock();
        if state.cancelled || state.taken || state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome);
        self.ready.notify_all();
        true
    }

    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock();
        if state.outcome.is_none() && !state.taken {
            state.cancelled = true;
            self.ready.notify_all();
        }
    }

    /// Whether nobody is waiting and nobody attached for longer than
    /// `threshold`.
    pub(crate) fn is_idle(&self, threshold: Duration) -> bool {
        let state = self.state.lock();
        state.waiters == 0
            && state.outcome.is_none()
            && elapsed_since(self.clock.as_ref(), state.last_attached) > threshold
    }

    /// Blocks for the outcome. `None` waits without a deadline, as does a
    /// timeout too large to express as an instant.
    fn wait(&self, timeout: Option<Duration>) -> Result<Reply, WaitError> {
        let sequence = self.sequence;
        let mut state = self.state.lock();
        if !state.taken && !state.cancelled && state.outcome.is_none() {
            let deadline = timeout.and_then(|limit| Instant::now().checked_add(limit));
            state.waiters += 1;
            state.last_attached = self.clock.now();
            while state.outcome.is_none() && !state.cancelled && !state.taken {
                match deadline {
                    Some(at) => {
                        if self.ready.wait_until(&mut state, at).timed_out() {
                            break;
                        }
                    }
                    None => self.ready.wait(&mut state),
                }
            }
            state.waiters -= 1;
            state.last_attached = self.clock.now();
        }

        if let Some(outcome) = state.outcome.take() {
            state.taken = true;
            return outcome.map_err(WaitError::Failed);
        }
        if state.taken {
            Err(WaitError::Consumed { sequence })
        } else if state.cancelled {
            Err(WaitError::Cancelled { sequence })
        } else {
            Err(WaitError::Timeout {
                sequence,
                timeout: timeout.unwrap_or(Duration::MAX),
            })
        }
    }
}

#[derive(Debug, Default)]
struct RepeatingState {
    waiters: Vec<Sender<Outcome>>,
    listeners: Vec<Sender<Outcome>>,
    closed: bool,
}

/// Subscription slot: one-time waiters plus persistent listener channels.
///
/// Deliveries are serialised by the state lock, so every channel receives
/// values in delivery order.
#[derive(Debug)]
pub(crate) struct Repeating {
    sequence: Sequence,
    state: Mutex<RepeatingState>,
}

impl Repeating {
    /// Creates the slot together with the receiver of its first listener.
    pub(crate) fn new(sequence: Sequence) -> (Self, Receiver<Outcome>) {
        let (sender, receiver) = mpsc::channel();
        let slot = Self {
            sequence,
            state: Mutex::new(RepeatingState {
                listeners: vec![sender],
                ..RepeatingState::default()
            }),
        };
        (slot, receiver)
    }

    pub(crate) fn deliver(&self, outcome: &Outcome) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        for waiter in state.waiters.drain(..) {
            if waiter.send(outcome.clone()).is_err() {
                tracing::trace!(
                    target: REPLY_STORE_TARGET,
                    sequence = %self.sequence,
                    "waiter left before delivery"
                );
            }
        }
        state
            .listeners
            .retain(|listener| listener.send(outcome.clone()).is_ok());
        if outcome.is_err() {
            Self::close_locked(&mut state);
        }
        true
    }

    pub(crate) fn close(&self) {
        Self::close_locked(&mut self.state.lock());
    }

    fn close_locked(state: &mut RepeatingState) {
        state.closed = true;
        state.waiters.clear();
        state.listeners.clear();
    }

    fn listen(&self) -> Result<Receiver<Outcome>, WaitError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(WaitError::Closed {
                sequence: self.sequence,
            });
        }
        let (sender, receiver) = mpsc::channel();
        state.listeners.push(sender);
        Ok(receiver)
    }

    /// Waits for the first value delivered after this call.
    pub(crate) fn wait_next(&self, timeout: Duration) -> Result<Reply, WaitError> {
        let receiver = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(WaitError::Closed {
                    sequence: self.sequence,
                });
            }
            let (sender, receiver) = mpsc::channel();
            state.waiters.push(sender);
            receiver
        };
        receive(self.sequence, &receiver, timeout)
    }

    pub(crate) fn spawn_listener(
        &self,
        listener: Arc<dyn ReplyListener>,
    ) -> Result<(), WaitError> {
        let receiver = self.listen()?;
        let sequence = self.sequence;
        thread::Builder::new()
            .name(format!("gw-listener-{sequence}"))
            .spawn(move || {
                while let Ok(outcome) = receiver.recv() {
                    match outcome {
                        Ok(reply) => listener.on_reply(reply),
                        Err(error) => {
                            listener.on_error(error);
                            break;
                        }
                    }
                }
                tracing::debug!(
                    target: REPLY_STORE_TARGET,
                    sequence = %sequence,
                    "subscription listener finished"
                );
            })
            .map(drop)
            .map_err(|source| WaitError::ListenerSpawn {
                sequence,
                source: Arc::new(source),
            })
    }
}

fn receive(
    sequence: Sequence,
    receiver: &Receiver<Outcome>,
    timeout: Duration,
) -> Result<Reply, WaitError> {
    match receiver.recv_timeout(timeout) {
        Ok(outcome) => outcome.map_err(WaitError::Failed),
        Err(RecvTimeoutError::Timeout) => Err(WaitError::Timeout { sequence, timeout }),
        Err(RecvTimeoutError::Disconnected) => Err(WaitError::Closed { sequence }),
    }
}

/// Awaitable answer to a single-shot request.
#[derive(Debug, Clone)]
pub struct PendingReply {
    inner: Arc<OneShot>,
}

impl PendingReply {
    pub(crate) const fn new(inner: Arc<OneShot>) -> Self {
        Self { inner }
    }

    /// Sequence the reply will answer.
    #[must_use]
    pub fn sequence(&self) -> Sequence {
        self.inner.sequence
    }

    /// Blocks until the reply arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`WaitError::Failed`] carries an error delivered for the request;
    /// [`WaitError::Timeout`] leaves the request pending so a later call may
    /// still succeed; [`WaitError::Consumed`] reports that another call
    /// already took the reply; [`WaitError::Cancelled`] reports that the
    /// request was swept or unregistered.
    pub fn wait(&self, timeout: Duration) -> Result<Reply, WaitError> {
        self.inner.wait(Some(timeout))
    }

    /// Blocks until the reply arrives, with no deadline.
    ///
    /// # Errors
    ///
    /// As [`PendingReply::wait`], except that it never times out.
    pub fn wait_forever(&self) -> Result<Reply, WaitError> {
        self.inner.wait(None)
    }
}

/// Ordered stream of notifications for one subscription.
///
/// Every value delivered after the subscription was registered is queued
/// until read, so no notification is lost between two calls to
/// [`Subscription::next_reply`].
#[derive(Debug)]
pub struct Subscription {
    sequence: Sequence,
    receiver: Receiver<Outcome>,
}

impl Subscription {
    pub(crate) const fn new(sequence: Sequence, receiver: Receiver<Outcome>) -> Self {
        Self { sequence, receiver }
    }

    /// Sequence identifying the subscription; UNOBSERVE must carry it.
    #[must_use]
    pub const fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Blocks until the next notification or `timeout`.
    ///
    /// # Errors
    ///
    /// [`WaitError::Failed`] ends the subscription with a delivered error,
    /// [`WaitError::Closed`] reports that it was unregistered and
    /// [`WaitError::Timeout`] that nothing arrived in time.
    pub fn next_reply(&self, timeout: Duration) -> Result<Reply, WaitError> {
        receive(self.sequence, &self.receiver, timeout)
    }
}

/// Handle returned for a registered waiter.
#[derive(Debug)]
pub enum ReplyHandle {
    /// Answer to a CREATE, READ, UPDATE or DELETE.
    Single(PendingReply),
    /// Stream of answers to an OBSERVE.
    Subscription(Subscription),
}

impl ReplyHandle {
    /// Sequence the handle is keyed by.
    #[must_use]
    pub fn sequence(&self) -> Sequence {
        match self {
            Self::Single(pending) => pending.sequence(),
            Self::Subscription(subscription) => subscription.sequence(),
        }
    }

    /// Single-shot handle, if this is one.
    #[must_use]
    pub fn into_single(self) -> Option<PendingReply> {
        match self {
            Self::Single(pending) => Some(pending),
            Self::Subscription(_) => None,
        }
    }

    /// Subscription handle, if this is one.
    #[must_use]
    pub fn into_subscription(self) -> Option<Subscription> {
        match self {
            Self::Subscription(subscription) => Some(subscription),
            Self::Single(_) => None,
        }
    }
}
