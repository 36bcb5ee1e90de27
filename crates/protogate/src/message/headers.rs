//! Routing and content metadata shared by requests and replies.

/// Highest quality-of-service level adapters may request.
pub const MAX_QOS: u8 = 2;

/// Header block carried by every request and reply.
///
/// `path` is opaque on ingress; the routing stage rewrites it to the decoded
/// resource path and fills in `target` with the decoded authority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    path: Option<String>,
    target: Option<String>,
    content_type: Option<String>,
    expected_types: Vec<String>,
    qos: Option<u8>,
}

impl Headers {
    /// Resource path.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Replaces the resource path.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = Some(path.into());
    }

    /// Target authority (`host[:port]`).
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Replaces the target authority.
    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = Some(target.into());
    }

    /// Media type of the payload.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Replaces the payload media type.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    /// Accepted reply media types, in preference order.
    #[must_use]
    pub fn expected_types(&self) -> &[String] {
        &self.expected_types
    }

    /// Appends an accepted media type; repeats are ignored.
    pub fn add_expected_type(&mut self, media_type: impl Into<String>) {
        let value = media_type.into();
        if !self.expected_types.contains(&value) {
            self.expected_types.push(value);
        }
    }

    /// Quality-of-service hint for brokers that support one.
    #[must_use]
    pub const fn qos(&self) -> Option<u8> {
        self.qos
    }

    /// Sets the QoS hint, clamped to [`MAX_QOS`].
    pub fn set_qos(&mut self, qos: u8) {
        self.qos = Some(qos.min(MAX_QOS));
    }
}
