//! Unit tests for the subscription registry.

use std::sync::Arc;
use std::thread;

use rstest::{fixture, rstest};

use super::*;
use crate::sequencer::Sequencer;

#[fixture]
fn identity() -> ResourceIdentity {
    ResourceIdentity::from_parts(&Protocol::new("coap"), "node:5683", "/sensors/temp")
        .expect("identity")
}

fn protocol(name: &str) -> Protocol {
    Protocol::new(name)
}

#[rstest]
fn permanent_interest_survives_and_one_shot_is_consumed(identity: ResourceIdentity) {
    let registry = SubscriptionRegistry::new();
    registry.add(&identity, &protocol("a"), Sequence::UNCORRELATED);
    registry.add(&identity, &protocol("b"), Sequence::from_raw(7));

    let first = registry.resolve(&identity).expect("first round");
    assert_eq!(first.len(), 2);
    assert!(
        first
            .sequences(&protocol("a"))
            .is_some_and(|set| set.contains(&Sequence::UNCORRELATED))
    );
    assert!(
        first
            .sequences(&protocol("b"))
            .is_some_and(|set| set.contains(&Sequence::from_raw(7)))
    );

    let second = registry.resolve(&identity).expect("second round");
    assert_eq!(second.len(), 1);
    assert!(second.sequences(&protocol("b")).is_none());
    assert!(second.sequences(&protocol("a")).is_some());
}

#[rstest]
fn observe_sequences_are_retained(identity: ResourceIdentity) {
    let sequencer = Sequencer::new();
    let observe = sequencer.next_observe();
    let registry = SubscriptionRegistry::new();
    registry.add(&identity, &protocol("http"), observe);

    for _ in 0..3 {
        let fan_out = registry.resolve(&identity).expect("resolve");
        assert_eq!(
            fan_out.sequences(&protocol("http")).map(BTreeSet::len),
            Some(1)
        );
    }
}

#[rstest]
fn unknown_identity_is_not_found(identity: ResourceIdentity) {
    let registry = SubscriptionRegistry::new();
    assert_eq!(
        registry.resolve(&identity),
        Err(RegistryError::NotFound {
            identity: identity.clone()
        })
    );
}

#[rstest]
fn consumed_identity_disappears(identity: ResourceIdentity) {
    let registry = SubscriptionRegistry::new();
    registry.add(&identity, &protocol("http"), Sequence::from_raw(1));
    assert!(registry.resolve(&identity).is_ok());
    assert!(!registry.contains(&identity));
    assert!(registry.resolve(&identity).is_err());
}

#[rstest]
fn remove_reports_last_listener(identity: ResourceIdentity) {
    let sequencer = Sequencer::new();
    let first = sequencer.next_observe();
    let second = sequencer.next_observe();
    let registry = SubscriptionRegistry::new();
    registry.add(&identity, &protocol("a"), first);
    registry.add(&identity, &protocol("a"), second);
    registry.add(&identity, &protocol("b"), Sequence::UNCORRELATED);

    assert!(!registry.remove(&identity, &protocol("a"), first));
    assert!(registry.remove(&identity, &protocol("a"), second));
    assert!(registry.contains(&identity));
    assert!(registry.remove(&identity, &protocol("b"), Sequence::UNCORRELATED));
    assert!(registry.is_empty());
}

#[rstest]
fn remove_on_absent_identity_reports_no_listener(identity: ResourceIdentity) {
    let registry = SubscriptionRegistry::new();
    assert!(registry.remove(&identity, &protocol("a"), Sequence::from_raw(3)));
}

#[rstest]
fn remove_by_sequence_sweeps_every_identity(identity: ResourceIdentity) {
    let other = ResourceIdentity::from_parts(&Protocol::new("coap"), "node:5683", "/led")
        .expect("identity");
    let registry = SubscriptionRegistry::new();
    let target = Sequence::from_raw(42);
    registry.add(&identity, &protocol("http"), target);
    registry.add(&other, &protocol("http"), target);
    registry.add(&other, &protocol("mqtt"), Sequence::UNCORRELATED);

    assert_eq!(registry.remove_by_sequence(target), 2);
    assert!(!registry.contains(&identity));
    assert!(registry.contains(&other));
    assert_eq!(registry.remove_by_sequence(target), 0);
}

#[rstest]
fn concurrent_adders_lose_nothing(identity: ResourceIdentity) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let workers: Vec<_> = (0..4_u64)
        .map(|worker| {
            let shared = Arc::clone(&registry);
            let key = identity.clone();
            thread::spawn(move || {
                for index in 1..=250 {
                    shared.add(&key, &Protocol::new("http"), Sequence::from_raw(worker * 1000 + index));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let fan_out = registry.resolve(&identity).expect("resolve");
    assert_eq!(
        fan_out.sequences(&Protocol::new("http")).map(BTreeSet::len),
        Some(1000)
    );
    assert!(registry.is_empty());
}
