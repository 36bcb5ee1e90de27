//! Shared state of a running gateway and the request and reply pipelines.
//!
//! Both pipelines run synchronously on the submitting thread up to the point
//! where work is handed to a plugin executor. Anything that goes wrong for a
//! correlated message ends up in the reply store as an [`ErrorMessage`], so
//! every waiter is answered exactly once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, warn};

use super::stage::{Envelope, Stage, StageError, run_stages};
use super::{DISPATCH_TARGET, GatewayError};
use crate::cache::ReplyCache;
use crate::executor::{ExecutorError, Job};
use crate::health::HealthReporter;
use crate::message::{ErrorCode, ErrorMessage, Message, Operation, Protocol, Reply, Request};
use crate::plugin::PluginTable;
use crate::reply_store::{HandleKind, ReplyHandle, ReplyStore};
use crate::routing::{RequestRoute, RoutingError, RoutingStage};
use crate::sequencer::{Sequence, Sequencer};
use crate::subscriptions::{FanOut, SubscriptionRegistry};

/// Collaborators assembled by the gateway builder.
pub(crate) struct CoreParts {
    pub(crate) replies: ReplyStore,
    pub(crate) cache: Arc<dyn ReplyCache>,
    pub(crate) plugins: PluginTable,
    pub(crate) input_stages: Vec<Arc<dyn Stage>>,
    pub(crate) output_stages: Vec<Arc<dyn Stage>>,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) reply_timeout: Duration,
}

/// Gateway state shared by the gateway handle, plugin links and jobs.
pub(crate) struct Core {
    sequencer: Sequencer,
    replies: ReplyStore,
    registry: SubscriptionRegistry,
    cache: Arc<dyn ReplyCache>,
    plugins: PluginTable,
    input_stages: Vec<Arc<dyn Stage>>,
    output_stages: Vec<Arc<dyn Stage>>,
    reporter: Arc<dyn HealthReporter>,
    reply_timeout: Duration,
    running: AtomicBool,
}

impl Core {
    pub(crate) fn new(parts: CoreParts) -> Self {
        Self {
            sequencer: Sequencer::new(),
            replies: parts.replies,
            registry: SubscriptionRegistry::new(),
            cache: parts.cache,
            plugins: parts.plugins,
            input_stages: parts.input_stages,
            output_stages: parts.output_stages,
            reporter: parts.reporter,
            reply_timeout: parts.reply_timeout,
            running: AtomicBool::new(true),
        }
    }

    pub(crate) const fn replies(&self) -> &ReplyStore {
        &self.replies
    }

    pub(crate) const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub(crate) const fn plugins(&self) -> &PluginTable {
        &self.plugins
    }

    pub(crate) fn reporter(&self) -> &dyn HealthReporter {
        self.reporter.as_ref()
    }

    pub(crate) const fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops accepting submissions. Returns `false` when already halted.
    pub(crate) fn halt(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    /// Sequences a request from `source`, registers its waiter and runs the
    /// request pipeline.
    pub(crate) fn submit(
        self: &Arc<Self>,
        source: &Protocol,
        mut request: Request,
    ) -> Result<Option<ReplyHandle>, GatewayError> {
        if !self.is_running() {
            return Err(GatewayError::Stopped);
        }
        let operation = request.operation();
        let (sequence, handle) = match operation {
            Operation::Unobserve => {
                let sequence = request
                    .sequence()
                    .ok_or(GatewayError::MissingSequence { operation })?;
                if let Some(owner) = self.replies.origin(sequence)
                    && owner != *source
                {
                    return Err(GatewayError::ForeignSubscription { sequence, owner });
                }
                (sequence, None)
            }
            Operation::Observe if request.sequence().is_some_and(Sequence::is_uncorrelated) => {
                (Sequence::UNCORRELATED, None)
            }
            Operation::Observe => {
                let sequence = self.sequencer.next_observe();
                let handle = self
                    .replies
                    .register(sequence, HandleKind::Repeating, source.clone())?;
                (sequence, Some(handle))
            }
            Operation::Create | Operation::Read | Operation::Update | Operation::Delete => {
                let sequence = self.sequencer.next_normal();
                let handle = self
                    .replies
                    .register(sequence, HandleKind::OneShot, source.clone())?;
                (sequence, Some(handle))
            }
        };
        request.set_sequence(sequence);

        self.guarded(sequence, || self.run_request(source, sequence, request));
        if operation == Operation::Unobserve {
            self.replies.unregister(sequence);
        }
        Ok(handle)
    }

    /// Runs the reply pipeline for a reply reported by the client plugin of
    /// `origin`.
    pub(crate) fn handle_reply(self: &Arc<Self>, origin: &Protocol, reply: Reply) {
        let sequence = reply.sequence().unwrap_or(Sequence::UNCORRELATED);
        self.guarded(sequence, || self.run_reply(origin, sequence, reply));
    }

    /// Completes `sequence` without data on behalf of the client plugin of
    /// `origin`.
    pub(crate) fn acknowledge(self: &Arc<Self>, origin: &Protocol, sequence: Sequence) {
        debug!(
            target: DISPATCH_TARGET,
            origin = %origin,
            sequence = %sequence,
            "acknowledgement received"
        );
        let waiter = self.replies.origin(sequence);
        let core = Arc::clone(self);
        let queued = self.run_on_server(
            waiter.as_ref(),
            Box::new(move || {
                core.replies.acknowledge(sequence);
                if !sequence.is_retained() {
                    core.registry.remove_by_sequence(sequence);
                }
            }),
        );
        if let (Err(error), Some(protocol)) = (queued, waiter) {
            self.shed(&protocol, &error, [sequence]);
        }
    }

    /// Delivers `error` to its waiter and forgets every interest held under
    /// its sequence.
    pub(crate) fn fail(&self, error: &ErrorMessage) {
        let sequence = error.sequence();
        if sequence.is_uncorrelated() {
            warn!(
                target: DISPATCH_TARGET,
                error = %error,
                "error for an uncorrelated message dropped"
            );
            return;
        }
        debug!(target: DISPATCH_TARGET, error = %error, "delivering error");
        self.replies.complete_with_error(error.clone());
        self.registry.remove_by_sequence(sequence);
    }

    /// Cancels idle single-shot waiters and their registry entries.
    pub(crate) fn sweep(&self) -> usize {
        let swept = self.replies.sweep_idle();
        for sequence in &swept {
            self.registry.remove_by_sequence(*sequence);
        }
        self.reporter.sweep_completed(swept.len());
        swept.len()
    }

    fn guarded(&self, sequence: Sequence, pipeline: impl FnOnce()) {
        if panic::catch_unwind(AssertUnwindSafe(pipeline)).is_err() {
            error!(
                target: DISPATCH_TARGET,
                sequence = %sequence,
                "pipeline panicked"
            );
            self.fail(&ErrorMessage::new(ErrorCode::Internal, sequence).with_detail("pipeline panicked"));
        }
    }

    fn run_request(self: &Arc<Self>, source: &Protocol, sequence: Sequence, request: Request) {
        let mut envelope = Envelope::new(source.clone(), Message::Request(request));
        if let Err(error) = run_stages(&self.input_stages, &mut envelope) {
            self.stage_failed(sequence, &error);
            return;
        }
        let Some(staged) = self.expect_request(sequence, envelope) else {
            return;
        };

        let routing = RoutingStage::new(&self.registry, self.cache.as_ref());
        match routing.process_request(source, staged) {
            Ok(RequestRoute::Forward { target, request }) => {
                self.forward(source, target, sequence, request);
            }
            Ok(RequestRoute::Cached { reply }) => {
                let mut fan_out = FanOut::default();
                fan_out.insert(source.clone(), sequence);
                self.deliver(source, sequence, reply, fan_out);
            }
            Ok(RequestRoute::Suppressed) => {}
            Err(error) => self.routing_failed(sequence, &error),
        }
    }

    fn forward(
        self: &Arc<Self>,
        source: &Protocol,
        target: Protocol,
        sequence: Sequence,
        request: Request,
    ) {
        let mut envelope =
            Envelope::new(source.clone(), Message::Request(request)).routed(target.clone());
        if let Err(error) = run_stages(&self.output_stages, &mut envelope) {
            self.stage_failed(sequence, &error);
            return;
        }
        let Some(staged) = self.expect_request(sequence, envelope) else {
            return;
        };

        let Some(slot) = self.plugins.client(&target) else {
            self.fail(
                &ErrorMessage::new(ErrorCode::UnavailableTarget, sequence)
                    .with_detail(format!("no client plugin for '{target}'")),
            );
            return;
        };
        let plugin = Arc::clone(&slot.plugin);
        let core = Arc::clone(self);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| plugin.handle_request(staged)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(
                    ErrorMessage::new(error.code(), sequence).with_detail(error.to_string()),
                ),
                Err(_) => Some(
                    ErrorMessage::new(ErrorCode::Internal, sequence)
                        .with_detail("client plugin panicked"),
                ),
            };
            if let Some(error) = failure {
                core.fail(&error);
            }
        });
        if let Err(error) = slot.executor.submit(job) {
            self.fail(
                &ErrorMessage::new(ErrorCode::UnavailableTarget, sequence)
                    .with_detail(error.to_string()),
            );
        }
    }

    fn run_reply(self: &Arc<Self>, origin: &Protocol, sequence: Sequence, reply: Reply) {
        let mut envelope = Envelope::new(origin.clone(), Message::Reply(reply));
        if let Err(error) = run_stages(&self.input_stages, &mut envelope) {
            self.stage_failed(sequence, &error);
            return;
        }
        let (message, _) = envelope.into_parts();
        let Message::Reply(staged) = message else {
            self.stage_failed(sequence, &kind_changed("reply"));
            return;
        };

        let direct = (!sequence.is_uncorrelated())
            .then(|| self.replies.origin(sequence))
            .flatten()
            .map(|waiter| (waiter, sequence));
        let routing = RoutingStage::new(&self.registry, self.cache.as_ref());
        match routing.process_reply(origin, &staged, direct) {
            Ok(fan_out) => self.deliver(origin, sequence, staged, fan_out),
            Err(error) => warn!(
                target: DISPATCH_TARGET,
                sequence = %sequence,
                error = %error,
                "reply dropped"
            ),
        }
    }

    /// Runs the output stages over a routed reply and hands one delivery job
    /// per recipient protocol to that protocol's server executor.
    fn deliver(self: &Arc<Self>, origin: &Protocol, sequence: Sequence, reply: Reply, fan_out: FanOut) {
        let mut envelope =
            Envelope::new(origin.clone(), Message::Reply(reply)).with_fan_out(fan_out);
        if let Err(error) = run_stages(&self.output_stages, &mut envelope) {
            self.stage_failed(sequence, &error);
            return;
        }
        let (message, recipients) = envelope.into_parts();
        let Message::Reply(staged) = message else {
            self.stage_failed(sequence, &kind_changed("reply"));
            return;
        };

        for (protocol, sequences) in recipients {
            let core = Arc::clone(self);
            let copy = staged.clone();
            let recipient = protocol.clone();
            let owed = sequences.clone();
            let queued = self.run_on_server(
                Some(&protocol),
                Box::new(move || core.deliver_local(&recipient, &copy, sequences)),
            );
            if let Err(error) = queued {
                self.shed(&protocol, &error, owed);
            }
        }
    }

    /// Answers single-shot waiters whose delivery could not be queued.
    /// Subscriptions and permanent interests only lose this one value.
    fn shed(
        &self,
        protocol: &Protocol,
        error: &ExecutorError,
        sequences: impl IntoIterator<Item = Sequence>,
    ) {
        warn!(
            target: DISPATCH_TARGET,
            protocol = %protocol,
            error = %error,
            "delivery shed"
        );
        for sequence in sequences {
            if !sequence.is_retained() {
                self.fail(
                    &ErrorMessage::new(ErrorCode::Internal, sequence).with_detail(error.to_string()),
                );
            }
        }
    }

    fn deliver_local(
        &self,
        protocol: &Protocol,
        reply: &Reply,
        sequences: impl IntoIterator<Item = Sequence>,
    ) {
        for sequence in sequences {
            if sequence.is_uncorrelated() {
                self.notify(protocol, reply.with_sequence(sequence));
            } else {
                self.replies.complete(sequence, reply.with_sequence(sequence));
                if !sequence.is_retained() {
                    self.registry.remove_by_sequence(sequence);
                }
            }
        }
    }

    fn notify(&self, protocol: &Protocol, reply: Reply) {
        let Some(slot) = self.plugins.server(protocol) else {
            debug!(
                target: DISPATCH_TARGET,
                protocol = %protocol,
                "no server plugin for permanent interest"
            );
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| slot.plugin.notify(reply))).is_err() {
            error!(
                target: DISPATCH_TARGET,
                protocol = %protocol,
                "server plugin panicked on notification"
            );
        }
    }

    /// Queues `job` on the server executor of `protocol`, or runs it inline
    /// when the protocol has no server plugin. Never blocks on a full
    /// backlog.
    fn run_on_server(&self, protocol: Option<&Protocol>, job: Job) -> Result<(), ExecutorError> {
        let Some(slot) = protocol.and_then(|name| self.plugins.server(name)) else {
            job();
            return Ok(());
        };
        slot.executor.submit(job)
    }

    fn expect_request(&self, sequence: Sequence, envelope: Envelope) -> Option<Request> {
        let (message, _) = envelope.into_parts();
        if let Message::Request(request) = message {
            Some(request)
        } else {
            self.stage_failed(sequence, &kind_changed("request"));
            None
        }
    }

    fn stage_failed(&self, sequence: Sequence, error: &StageError) {
        match error {
            StageError::Halt => debug!(
                target: DISPATCH_TARGET,
                sequence = %sequence,
                "pipeline halted by stage"
            ),
            StageError::Failed { .. } => self.fail(
                &ErrorMessage::new(ErrorCode::Internal, sequence).with_detail(error.to_string()),
            ),
        }
    }

    fn routing_failed(&self, sequence: Sequence, error: &RoutingError) {
        self.fail(&ErrorMessage::new(error.code(), sequence).with_detail(error.to_string()));
    }
}

fn kind_changed(expected: &str) -> StageError {
    StageError::failed("pipeline", format!("a stage replaced the {expected}"))
}
