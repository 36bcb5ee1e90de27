//! Protocol-neutral request and reply containers.
//!
//! Adapters translate their wire formats into [`Request`] and [`Reply`]
//! values; the core never inspects payload bytes. Failures travel as
//! [`ErrorMessage`] values keyed by the sequence they answer, so a waiter has a
//! single channel for both outcomes.

mod headers;
mod payload;

use std::fmt;
use std::sync::Arc;

use strum::{Display, EnumString};

use crate::sequencer::Sequence;

pub use self::headers::{Headers, MAX_QOS};
pub use self::payload::Payload;

/// Operation requested of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Operation {
    /// Create a resource.
    Create,
    /// Read a resource once.
    Read,
    /// Update a resource.
    Update,
    /// Delete a resource.
    Delete,
    /// Subscribe to every future update of a resource.
    Observe,
    /// Cancel a subscription.
    Unobserve,
}

impl Operation {
    /// Returns `true` for operations answered by exactly one reply.
    #[must_use]
    pub const fn is_single_shot(self) -> bool {
        matches!(self, Self::Create | Self::Read | Self::Update | Self::Delete)
    }

    /// Returns `true` for operations that may be answered from the cache.
    #[must_use]
    pub const fn is_cacheable(self) -> bool {
        matches!(self, Self::Read | Self::Observe)
    }
}

/// Normalised protocol name (lower-case, surrounding whitespace removed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Protocol(Arc<str>);

impl Protocol {
    /// Normalises a protocol name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name.trim().to_ascii_lowercase()))
    }

    /// Borrowed name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the name is empty after normalisation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Protocol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request travelling from a server-role adapter towards a target protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    operation: Operation,
    headers: Headers,
    payload: Payload,
    sequence: Option<Sequence>,
}

impl Request {
    /// Creates an unsequenced request for the given opaque path.
    #[must_use]
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        let mut headers = Headers::default();
        headers.set_path(path);
        Self {
            operation,
            headers,
            payload: Payload::default(),
            sequence: None,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Declares the payload content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.headers.set_content_type(content_type);
        self
    }

    /// Adds an accepted reply type.
    #[must_use]
    pub fn with_expected_type(mut self, media_type: impl Into<String>) -> Self {
        self.headers.add_expected_type(media_type);
        self
    }

    /// Pre-stamps a sequence. Required for UNOBSERVE; `UNCORRELATED` on an
    /// OBSERVE requests permanent, out-of-band notifications.
    #[must_use]
    pub const fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Requested operation.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Routing and content headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable headers.
    pub const fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Request body.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Correlation sequence, once assigned.
    #[must_use]
    pub const fn sequence(&self) -> Option<Sequence> {
        self.sequence
    }

    pub(crate) const fn set_sequence(&mut self, sequence: Sequence) {
        self.sequence = Some(sequence);
    }
}

/// Reply travelling from a client-role adapter back towards waiters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    headers: Headers,
    payload: Payload,
    sequence: Option<Sequence>,
}

impl Reply {
    /// Creates an unsequenced reply, used for notifications that do not
    /// answer a specific request.
    #[must_use]
    pub fn notification(target: impl Into<String>, path: impl Into<String>) -> Self {
        let mut headers = Headers::default();
        headers.set_target(target);
        headers.set_path(path);
        Self {
            headers,
            payload: Payload::default(),
            sequence: None,
        }
    }

    /// Creates a reply to `request`, inheriting its routing headers and sequence.
    #[must_use]
    pub fn answering(request: &Request) -> Self {
        let mut headers = Headers::default();
        if let Some(target) = request.headers().target() {
            headers.set_target(target);
        }
        if let Some(path) = request.headers().path() {
            headers.set_path(path);
        }
        Self {
            headers,
            payload: Payload::default(),
            sequence: request.sequence(),
        }
    }

    /// Empty reply used to acknowledge a request without data.
    #[must_use]
    pub fn empty(sequence: Sequence) -> Self {
        Self {
            sequence: Some(sequence),
            ..Self::default()
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Declares the payload content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.headers.set_content_type(content_type);
        self
    }

    /// Copy of this reply stamped with another sequence.
    #[must_use]
    pub fn with_sequence(&self, sequence: Sequence) -> Self {
        Self {
            headers: self.headers.clone(),
            payload: self.payload.clone(),
            sequence: Some(sequence),
        }
    }

    /// Routing and content headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable headers.
    pub const fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Reply body.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Sequence this reply answers, if any.
    #[must_use]
    pub const fn sequence(&self) -> Option<Sequence> {
        self.sequence
    }
}

/// Failure classes delivered to waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorCode {
    /// The request path could not be decoded into a target.
    InvalidAddress,
    /// No client plugin is registered for the target protocol.
    UnavailableTarget,
    /// The adapter could not reach the target.
    TargetNotFound,
    /// An uncaught fault inside the pipeline.
    Internal,
}

/// Structured error answering a specific sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    code: ErrorCode,
    sequence: Sequence,
    detail: Option<String>,
}

impl ErrorMessage {
    /// Creates an error without detail text.
    #[must_use]
    pub const fn new(code: ErrorCode, sequence: Sequence) -> Self {
        Self {
            code,
            sequence,
            detail: None,
        }
    }

    /// Attaches human-readable detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Error class.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Sequence the error answers.
    #[must_use]
    pub const fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Detail text, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for sequence {}", self.code, self.sequence)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorMessage {}

/// Message carried through the gateway pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Request on its way to a client plugin.
    Request(Request),
    /// Reply on its way to waiters.
    Reply(Reply),
    /// Error on its way to a waiter.
    Error(ErrorMessage),
}

impl Message {
    /// Sequence the message is correlated with.
    #[must_use]
    pub const fn sequence(&self) -> Option<Sequence> {
        match self {
            Self::Request(request) => request.sequence(),
            Self::Reply(reply) => reply.sequence(),
            Self::Error(error) => Some(error.sequence()),
        }
    }
}
