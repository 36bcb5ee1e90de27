//! Correlation identifiers.
//!
//! A [`Sequence`] is a 63-bit value. Bit 62 tags the observe class; the lower
//! 62 bits carry a counter shared by both classes, so no two identifiers
//! issued by one [`Sequencer`] ever compare equal, whichever class they
//! belong to. Zero is reserved for "pre-assigned, no correlation expected".

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const OBSERVE_TAG: u64 = 1 << 62;
const COUNTER_MASK: u64 = OBSERVE_TAG - 1;

/// Gateway-assigned correlation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sequence(u64);

impl Sequence {
    /// Reserved value: pre-assigned, no correlation expected.
    ///
    /// Inside the subscription registry it marks the permanent interest of a
    /// protocol whose notifications are pushed out-of-band.
    pub const UNCORRELATED: Self = Self(0);

    /// Restates a sequence received earlier from the gateway.
    ///
    /// Bits beyond the 63-bit range are discarded.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw & (OBSERVE_TAG | COUNTER_MASK))
    }

    /// Raw integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` for identifiers of the observe class.
    #[must_use]
    pub const fn is_observe(self) -> bool {
        self.0 & OBSERVE_TAG != 0
    }

    /// Returns `true` for the reserved zero value.
    #[must_use]
    pub const fn is_uncorrelated(self) -> bool {
        self.0 == 0
    }

    /// Whether an interest registered under this sequence survives a
    /// notification round.
    ///
    /// Permanent interest (zero) and live subscriptions (observe class) are
    /// retained; a normal sequence wants exactly one reply.
    #[must_use]
    pub const fn is_retained(self) -> bool {
        self.is_uncorrelated() || self.is_observe()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_observe() {
            write!(f, "o{}", self.0 & COUNTER_MASK)
        } else {
            write!(f, "n{}", self.0)
        }
    }
}

/// Thread-safe issuer of [`Sequence`] values.
#[derive(Debug, Default)]
pub struct Sequencer {
    counter: AtomicU64,
}

impl Sequencer {
    /// Creates a sequencer whose first identifier has counter value 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Issues an identifier for single-shot correlation.
    #[must_use]
    pub fn next_normal(&self) -> Sequence {
        Sequence(self.next_counter())
    }

    /// Issues an identifier for subscription correlation.
    #[must_use]
    pub fn next_observe(&self) -> Sequence {
        Sequence(self.next_counter() | OBSERVE_TAG)
    }

    /// Classifies an identifier.
    #[must_use]
    pub const fn is_observe(sequence: Sequence) -> bool {
        sequence.is_observe()
    }

    fn next_counter(&self) -> u64 {
        loop {
            let value = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & COUNTER_MASK;
            if value != 0 {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use rstest::rstest;

    use super::*;

    #[test]
    fn classes_are_classified() {
        let sequencer = Sequencer::new();
        let normal = sequencer.next_normal();
        let observe = sequencer.next_observe();
        assert!(!Sequencer::is_observe(normal));
        assert!(Sequencer::is_observe(observe));
        assert!(!normal.is_uncorrelated());
        assert!(!observe.is_uncorrelated());
    }

    #[test]
    fn identifiers_increase_within_each_class() {
        let sequencer = Sequencer::new();
        let first = sequencer.next_normal();
        let _interleaved = sequencer.next_observe();
        let second = sequencer.next_normal();
        assert!(second > first);

        let observe_a = sequencer.next_observe();
        let observe_b = sequencer.next_observe();
        assert!(observe_b > observe_a);
    }

    #[rstest]
    #[case::zero(Sequence::UNCORRELATED, true)]
    #[case::normal(Sequence::from_raw(7), false)]
    #[case::observe(Sequence::from_raw(OBSERVE_TAG | 3), true)]
    fn retention_follows_class(#[case] sequence: Sequence, #[case] retained: bool) {
        assert_eq!(sequence.is_retained(), retained);
    }

    #[test]
    fn from_raw_drops_the_sign_bit() {
        let sequence = Sequence::from_raw(u64::MAX);
        assert!(sequence.is_observe());
        assert_eq!(sequence.get(), OBSERVE_TAG | COUNTER_MASK);
    }

    #[test]
    fn counter_skips_zero_on_wrap() {
        let sequencer = Sequencer {
            counter: AtomicU64::new(COUNTER_MASK),
        };
        let sequence = sequencer.next_normal();
        assert_eq!(sequence.get(), 1);
    }

    #[test]
    fn concurrent_issuers_never_collide() {
        let sequencer = Arc::new(Sequencer::new());
        let workers: Vec<_> = (0..8)
            .map(|index| {
                let sequencer = Arc::clone(&sequencer);
                thread::spawn(move || {
                    (0..1000)
                        .map(|_| {
                            if index % 2 == 0 {
                                sequencer.next_normal()
                            } else {
                                sequencer.next_observe()
                            }
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            for sequence in worker.join().expect("worker panicked") {
                assert!(seen.insert(sequence), "duplicate sequence {sequence}");
                assert!(!sequence.is_uncorrelated());
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn display_marks_the_class() {
        assert_eq!(Sequence::from_raw(5).to_string(), "n5");
        assert_eq!(Sequence::from_raw(OBSERVE_TAG | 5).to_string(), "o5");
    }
}
