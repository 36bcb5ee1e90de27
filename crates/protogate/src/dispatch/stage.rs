//! User pipeline stages.
//!
//! Stages run synchronously on the submitting thread, input stages before the
//! routing stage and output stages after it. A stage may rewrite the message
//! it is handed but must keep its kind: a request stays a request.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::message::{Message, Protocol};
use crate::subscriptions::FanOut;

/// Failures raised by a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The stage failed; the originating waiter receives an internal error.
    #[error("stage '{stage}' failed: {message}")]
    Failed {
        /// Name of the failing stage.
        stage: String,
        /// Human-readable failure description.
        message: String,
    },
    /// Stop processing the message without reporting another error.
    #[error("pipeline halted")]
    Halt,
}

impl StageError {
    /// Creates a stage failure.
    pub fn failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Message in flight together with its routing context.
#[derive(Debug)]
pub struct Envelope {
    source: Protocol,
    target: Option<Protocol>,
    message: Message,
    fan_out: FanOut,
}

impl Envelope {
    pub(crate) fn new(source: Protocol, message: Message) -> Self {
        Self {
            source,
            target: None,
            message,
            fan_out: FanOut::default(),
        }
    }

    pub(crate) fn routed(mut self, target: Protocol) -> Self {
        self.target = Some(target);
        self
    }

    pub(crate) fn with_fan_out(mut self, fan_out: FanOut) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Protocol the message came from.
    #[must_use]
    pub const fn source(&self) -> &Protocol {
        &self.source
    }

    /// Protocol a request is forwarded to, once routed.
    #[must_use]
    pub const fn target(&self) -> Option<&Protocol> {
        self.target.as_ref()
    }

    /// The message itself.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Mutable access for stages that rewrite the message.
    pub const fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Recipients of a routed reply. Empty on the request path and before
    /// routing.
    #[must_use]
    pub const fn fan_out(&self) -> &FanOut {
        &self.fan_out
    }

    pub(crate) fn into_parts(self) -> (Message, FanOut) {
        (self.message, self.fan_out)
    }
}

/// A step of the gateway pipeline.
pub trait Stage: Send + Sync {
    /// Name used in logs and error details.
    fn name(&self) -> &str;

    /// Processes the message in `envelope`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Failed`] to fail the message or
    /// [`StageError::Halt`] to drop it silently.
    fn process(&self, envelope: &mut Envelope) -> Result<(), StageError>;
}

/// Runs `stages` in order, stopping at the first error. A panicking stage is
/// reported as a failure of that stage.
pub(crate) fn run_stages(
    stages: &[Arc<dyn Stage>],
    envelope: &mut Envelope,
) -> Result<(), StageError> {
    for stage in stages {
        panic::catch_unwind(AssertUnwindSafe(|| stage.process(envelope)))
            .unwrap_or_else(|_| Err(StageError::failed(stage.name(), "panicked")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;

    use super::*;
    use crate::message::{Operation, Request};

    struct Counting {
        calls: AtomicUsize,
        outcome: Result<(), StageError>,
    }

    impl Counting {
        fn new(outcome: Result<(), StageError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome,
            })
        }
    }

    impl Stage for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn process(&self, _envelope: &mut Envelope) -> Result<(), StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    struct Panicking;

    impl Stage for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn process(&self, _envelope: &mut Envelope) -> Result<(), StageError> {
            panic!("stage fault");
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(
            Protocol::new("http"),
            Message::Request(Request::new(Operation::Read, "/mqtt/broker/a")),
        )
    }

    #[rstest]
    #[case::failed(StageError::failed("counting", "boom"))]
    #[case::halt(StageError::Halt)]
    fn first_error_stops_the_pipeline(#[case] error: StageError) {
        let failing = Counting::new(Err(error.clone()));
        let skipped = Counting::new(Ok(()));
        let stages: Vec<Arc<dyn Stage>> = vec![failing.clone(), skipped.clone()];

        let outcome = run_stages(&stages, &mut envelope());

        assert_eq!(outcome, Err(error));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(skipped.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panic_becomes_a_named_failure() {
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(Panicking)];
        let outcome = run_stages(&stages, &mut envelope());
        assert_eq!(outcome, Err(StageError::failed("panicking", "panicked")));
    }

    #[test]
    fn stages_may_rewrite_the_message() {
        struct Tagging;

        impl Stage for Tagging {
            fn name(&self) -> &str {
                "tagging"
            }

            fn process(&self, envelope: &mut Envelope) -> Result<(), StageError> {
                if let Message::Request(request) = envelope.message_mut() {
                    request.headers_mut().set_content_type("text/plain");
                }
                Ok(())
            }
        }

        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(Tagging)];
        let mut subject = envelope();
        run_stages(&stages, &mut subject).expect("stages succeed");
        let Message::Request(request) = subject.message() else {
            panic!("request expected");
        };
        assert_eq!(request.headers().content_type(), Some("text/plain"));
    }
}
