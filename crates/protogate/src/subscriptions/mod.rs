//! Interest registry keyed by canonical resource identity.
//!
//! Each identity maps to the protocols interested in it and, per protocol,
//! the sequences owed a copy of the next reply. Retained sequences (the
//! permanent marker and live subscriptions) survive every resolve round;
//! single-shot sequences are consumed by the first round that captures them.

#[cfg(test)]
mod tests;

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::identity::ResourceIdentity;
use crate::message::Protocol;
use crate::sequencer::Sequence;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::subscriptions");

/// Errors raised by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Nobody is interested in the identity.
    #[error("no interest registered for '{identity}'")]
    NotFound {
        /// Looked-up identity.
        identity: ResourceIdentity,
    },
}

/// Protocol → sequences owed a copy of one reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut(BTreeMap<Protocol, BTreeSet<Sequence>>);

impl FanOut {
    /// Adds one delivery target.
    pub fn insert(&mut self, protocol: Protocol, sequence: Sequence) {
        self.0.entry(protocol).or_default().insert(sequence);
    }

    /// Sequences owed to `protocol`.
    #[must_use]
    pub fn sequences(&self, protocol: &Protocol) -> Option<&BTreeSet<Sequence>> {
        self.0.get(protocol)
    }

    /// Number of protocols addressed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no delivery is owed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates protocols with their sequences.
    pub fn iter(&self) -> btree_map::Iter<'_, Protocol, BTreeSet<Sequence>> {
        self.0.iter()
    }
}

impl IntoIterator for FanOut {
    type Item = (Protocol, BTreeSet<Sequence>);
    type IntoIter = btree_map::IntoIter<Protocol, BTreeSet<Sequence>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FanOut {
    type Item = (&'a Protocol, &'a BTreeSet<Sequence>);
    type IntoIter = btree_map::Iter<'a, Protocol, BTreeSet<Sequence>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

type Interest = HashMap<Protocol, BTreeSet<Sequence>>;

/// Concurrent identity → protocol → sequences map.
///
/// Operations on one identity are serialised by the map's per-key locking;
/// unrelated identities proceed independently.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    interests: DashMap<ResourceIdentity, Interest>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `protocol` wants replies for `identity` under `sequence`.
    pub fn add(&self, identity: &ResourceIdentity, protocol: &Protocol, sequence: Sequence) {
        self.interests
            .entry(identity.clone())
            .or_default()
            .entry(protocol.clone())
            .or_default()
            .insert(sequence);
        debug!(
            target: REGISTRY_TARGET,
            identity = %identity,
            protocol = %protocol,
            sequence = %sequence,
            "interest added"
        );
    }

    /// Drops one interest and reports whether `protocol` has no listener
    /// left for `identity`.
    ///
    /// An identity or protocol that was never registered has no listener
    /// left either.
    pub fn remove(
        &self,
        identity: &ResourceIdentity,
        protocol: &Protocol,
        sequence: Sequence,
    ) -> bool {
        let Some(mut interest) = self.interests.get_mut(identity) else {
            return true;
        };
        let remaining = match interest.get_mut(protocol) {
            Some(sequences) => {
                sequences.remove(&sequence);
                sequences.len()
            }
            None => 0,
        };
        if remaining == 0 {
            interest.remove(protocol);
        }
        let identity_empty = interest.is_empty();
        drop(interest);
        if identity_empty {
            self.interests
                .remove_if(identity, |_, current| current.is_empty());
        }
        debug!(
            target: REGISTRY_TARGET,
            identity = %identity,
            protocol = %protocol,
            sequence = %sequence,
            remaining,
            "interest removed"
        );
        remaining == 0
    }

    /// Captures every sequence owed a copy of the next reply for `identity`.
    ///
    /// Single-shot sequences are consumed; retained ones stay registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when nobody is interested in
    /// `identity`.
    pub fn resolve(&self, identity: &ResourceIdentity) -> Result<FanOut, RegistryError> {
        let not_found = || RegistryError::NotFound {
            identity: identity.clone(),
        };
        let mut interest = self.interests.get_mut(identity).ok_or_else(not_found)?;

        let mut fan_out = FanOut::default();
        for (protocol, sequences) in interest.iter_mut() {
            for sequence in sequences.iter() {
                fan_out.insert(protocol.clone(), *sequence);
            }
            sequences.retain(|sequence| sequence.is_retained());
        }
        interest.retain(|_, sequences| !sequences.is_empty());
        let identity_empty = interest.is_empty();
        drop(interest);

        if identity_empty {
            self.interests
                .remove_if(identity, |_, current| current.is_empty());
        }
        if fan_out.is_empty() {
            return Err(not_found());
        }
        Ok(fan_out)
    }

    /// Removes `sequence` wherever it appears. Returns how many interest
    /// sets held it.
    pub fn remove_by_sequence(&self, sequence: Sequence) -> usize {
        let mut removed = 0;
        self.interests.retain(|_, interest| {
            interest.retain(|_, sequences| {
                if sequences.remove(&sequence) {
                    removed += 1;
                }
                !sequences.is_empty()
            });
            !interest.is_empty()
        });
        if removed > 0 {
            debug!(
                target: REGISTRY_TARGET,
                sequence = %sequence,
                removed,
                "interest purged"
            );
        }
        removed
    }

    /// Whether anyone is interested in `identity`.
    #[must_use]
    pub fn contains(&self, identity: &ResourceIdentity) -> bool {
        self.interests.contains_key(identity)
    }

    /// Number of identities with interest.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interests.len()
    }

    /// Returns `true` when no identity has interest.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }
}
