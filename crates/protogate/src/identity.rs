//! Target address decoding and canonical resource identities.
//!
//! Server adapters hand the gateway an opaque path whose first segment names
//! the target protocol, for example `/mqtt/broker:1883/sensors/temp` or
//! `/http://device.local:1234/sensors/temp?b=2&a=1`. Decoding turns it into
//! the target protocol, the authority and the remaining path, and derives the
//! [`ResourceIdentity`] used as the subscription and cache key.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::message::Protocol;

/// Errors raised while decoding a target address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The path does not start with a protocol segment.
    #[error("no target protocol in '{0}'")]
    MissingScheme(String),
    /// The path names a protocol but no authority.
    #[error("no target authority in '{0}'")]
    MissingAuthority(String),
    /// The rebuilt URL failed to parse.
    #[error("malformed target address '{path}': {source}")]
    Malformed {
        /// Offending input.
        path: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },
}

/// Canonical `scheme://authority/path?sorted-query` form of a resource.
///
/// Two requests that differ only in query-parameter order map to the same
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity(Arc<str>);

impl ResourceIdentity {
    /// Rebuilds the identity of a resource reported by a client adapter.
    ///
    /// `path` may omit its leading slash, as broker topics usually do.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] when the parts do not form a valid address.
    pub fn from_parts(
        protocol: &Protocol,
        authority: &str,
        path: &str,
    ) -> Result<Self, AddressError> {
        let raw = format!(
            "{protocol}://{authority}/{}",
            path.trim_start_matches('/')
        );
        canonicalise(&raw, &raw).map(|address| address.identity)
    }

    /// Borrowed canonical form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    protocol: Protocol,
    authority: String,
    path: String,
    identity: ResourceIdentity,
}

impl TargetAddress {
    /// Decodes a compact, protocol-prefixed path.
    ///
    /// Leading slashes are ignored and the first run of slashes separates
    /// the protocol from the authority. A trailing `:` on the protocol is
    /// tolerated so full URLs may be embedded verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] for a missing protocol or authority, or when
    /// the rebuilt URL does not parse.
    pub fn decode(path: &str) -> Result<Self, AddressError> {
        let (head, tail) = path
            .trim_start_matches('/')
            .split_once('/')
            .ok_or_else(|| AddressError::MissingScheme(path.to_owned()))?;
        let scheme = head.strip_suffix(':').unwrap_or(head);
        if scheme.is_empty() {
            return Err(AddressError::MissingScheme(path.to_owned()));
        }
        let rebuilt = format!("{scheme}://{}", tail.trim_start_matches('/'));
        canonicalise(path, &rebuilt)
    }

    /// Target protocol.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Target authority (`host[:port]`).
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Normalised path including the sorted query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Canonical identity of the addressed resource.
    #[must_use]
    pub const fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }
}

impl FromStr for TargetAddress {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::decode(input)
    }
}

fn canonicalise(original: &str, raw: &str) -> Result<TargetAddress, AddressError> {
    let mut url = Url::parse(raw).map_err(|source| AddressError::Malformed {
        path: original.to_owned(),
        source,
    })?;

    let authority = match (url.host_str(), url.port()) {
        (Some(host), _) if host.is_empty() => None,
        (Some(host), Some(port)) => Some(format!("{host}:{port}")),
        (Some(host), None) => Some(host.to_owned()),
        (None, _) => None,
    }
    .ok_or_else(|| AddressError::MissingAuthority(original.to_owned()))?;

    sort_query(&mut url);
    url.set_fragment(None);

    let mut path = if url.path().is_empty() {
        "/".to_owned()
    } else {
        url.path().to_owned()
    };
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    let protocol = Protocol::new(url.scheme());
    let identity = ResourceIdentity(Arc::from(format!("{protocol}://{authority}{path}")));
    Ok(TargetAddress {
        protocol,
        authority,
        path,
        identity,
    })
}

fn sort_query(url: &mut Url) {
    if url.query().is_none_or(str::is_empty) {
        url.set_query(None);
        return;
    }
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort_by(|left, right| left.0.cmp(&right.0));
    url.query_pairs_mut().clear().extend_pairs(pairs);
}
