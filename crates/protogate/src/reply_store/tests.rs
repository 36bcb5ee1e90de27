//! Unit tests for the reply store.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::clock::ManualClock;
use crate::message::ErrorCode;

const IDLE: Duration = Duration::from_secs(40);
const SHORT: Duration = Duration::from_millis(50);
const LONG: Duration = Duration::from_secs(5);

struct Harness {
    clock: Arc<ManualClock>,
    store: ReplyStore,
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new());
    let store = ReplyStore::with_clock(IDLE, Arc::clone(&clock) as Arc<dyn Clock>);
    Harness { clock, store }
}

fn http() -> Protocol {
    Protocol::new("http")
}

fn seq(raw: u64) -> Sequence {
    Sequence::from_raw(raw)
}

fn reply(body: &str) -> Reply {
    Reply::notification("device.local", "/sensors/temp").with_payload(body)
}

fn pending(store: &ReplyStore, sequence: Sequence) -> PendingReply {
    store
        .register(sequence, HandleKind::OneShot, http())
        .expect("register")
        .into_single()
        .expect("single handle")
}

fn subscription(store: &ReplyStore, sequence: Sequence) -> Subscription {
    store
        .register(sequence, HandleKind::Repeating, http())
        .expect("register")
        .into_subscription()
        .expect("subscription handle")
}

#[rstest]
fn one_shot_round_trip_removes_entry(harness: Harness) {
    let handle = pending(&harness.store, seq(1));
    assert!(harness.store.complete(seq(1), reply("21.5")));
    assert!(!harness.store.contains(seq(1)));

    let received = handle.wait(LONG).expect("reply");
    assert_eq!(received.payload().as_bytes(), b"21.5");

    assert!(!harness.store.complete(seq(1), reply("22.0")));
    assert!(matches!(
        handle.wait(SHORT),
        Err(WaitError::Consumed { .. })
    ));
}

#[rstest]
fn reply_reaches_a_blocked_waiter(harness: Harness) {
    let handle = pending(&harness.store, seq(2));
    let waiter = thread::spawn(move || handle.wait(LONG));
    thread::sleep(SHORT);
    assert!(harness.store.complete(seq(2), reply("on")));
    let received = waiter.join().expect("waiter panicked").expect("reply");
    assert_eq!(received.payload().as_bytes(), b"on");
}

#[rstest]
fn timeout_keeps_the_entry(harness: Harness) {
    let handle = pending(&harness.store, seq(3));
    assert!(matches!(
        handle.wait(SHORT),
        Err(WaitError::Timeout { .. })
    ));
    assert!(harness.store.contains(seq(3)));
    assert!(harness.store.complete(seq(3), reply("late")));
    assert!(handle.wait(SHORT).is_ok());
}

#[rstest]
#[case::unbounded_timeout(Some(Duration::MAX))]
#[case::no_deadline(None)]
fn waits_without_a_usable_deadline_still_complete(
    harness: Harness,
    #[case] timeout: Option<Duration>,
) {
    let handle = pending(&harness.store, seq(5));
    let waiter = thread::spawn(move || match timeout {
        Some(limit) => handle.wait(limit),
        None => handle.wait_forever(),
    });
    thread::sleep(SHORT);
    assert!(harness.store.complete(seq(5), reply("21.5")));
    let received = waiter.join().expect("waiter panicked").expect("reply");
    assert_eq!(received.payload().as_bytes(), b"21.5");
}

#[rstest]
fn untimed_waiter_holds_off_the_sweep_until_unregistered(harness: Harness) {
    let handle = pending(&harness.store, seq(6));
    let store = Arc::new(harness.store);
    let waiting = Arc::clone(&store);
    let waiter = thread::spawn(move || waiting.wait_forever(seq(6)));
    thread::sleep(SHORT);

    harness.clock.advance(IDLE * 2);
    assert!(store.sweep_idle().is_empty());

    assert!(store.unregister(seq(6)));
    assert!(matches!(
        waiter.join().expect("waiter panicked"),
        Err(WaitError::Cancelled { .. })
    ));
    assert!(matches!(
        handle.wait(Duration::MAX),
        Err(WaitError::Cancelled { .. })
    ));
}

#[rstest]
fn duplicate_registration_is_rejected(harness: Harness) {
    let _handle = pending(&harness.store, seq(4));
    let error = harness
        .store
        .register(seq(4), HandleKind::Repeating, http())
        .expect_err("collision");
    assert_eq!(error, SequenceCollision { sequence: seq(4) });
}

#[rstest]
fn error_completes_and_removes_any_kind(harness: Harness) {
    let single = pending(&harness.store, seq(5));
    let stream = subscription(&harness.store, seq(6));

    assert!(
        harness
            .store
            .complete_with_error(ErrorMessage::new(ErrorCode::TargetNotFound, seq(5)))
    );
    assert!(
        harness
            .store
            .complete_with_error(ErrorMessage::new(ErrorCode::Internal, seq(6)))
    );
    assert!(harness.store.is_empty());

    match single.wait(SHORT) {
        Err(WaitError::Failed(error)) => assert_eq!(error.code(), ErrorCode::TargetNotFound),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(matches!(stream.next_reply(SHORT), Err(WaitError::Failed(_))));
    assert!(matches!(stream.next_reply(SHORT), Err(WaitError::Closed { .. })));
}

#[rstest]
fn ack_completes_one_shot_with_empty_reply(harness: Harness) {
    let handle = pending(&harness.store, seq(7));
    assert!(harness.store.acknowledge(seq(7)));
    let received = handle.wait(SHORT).expect("ack");
    assert!(received.payload().is_empty());
    assert_eq!(received.sequence(), Some(seq(7)));
}

#[rstest]
fn ack_on_subscription_delivers_nothing(harness: Harness) {
    let stream = subscription(&harness.store, seq(8));
    assert!(harness.store.acknowledge(seq(8)));
    assert!(harness.store.contains(seq(8)));
    assert!(matches!(stream.next_reply(SHORT), Err(WaitError::Timeout { .. })));
}

#[rstest]
fn unknown_sequences_are_correlation_misses(harness: Harness) {
    assert!(!harness.store.complete(seq(99), reply("x")));
    assert!(!harness.store.acknowledge(seq(99)));
    assert!(
        !harness
            .store
            .complete_with_error(ErrorMessage::new(ErrorCode::Internal, seq(99)))
    );
    assert!(matches!(
        harness.store.wait(seq(99), SHORT),
        Err(WaitError::Unknown { .. })
    ));
}

#[rstest]
fn subscription_observes_deliveries_in_order(harness: Harness) {
    let stream = subscription(&harness.store, seq(10));
    for index in 0..50 {
        assert!(harness.store.complete(seq(10), reply(&index.to_string())));
    }
    assert!(harness.store.contains(seq(10)));
    for index in 0..50 {
        let received = stream.next_reply(LONG).expect("notification");
        assert_eq!(received.payload().as_bytes(), index.to_string().as_bytes());
    }
}

#[rstest]
fn concurrent_producers_keep_per_producer_order(harness: Harness) {
    let store = Arc::new(harness.store);
    let stream = subscription(&store, seq(11));
    let producers: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|tag| {
            let shared = Arc::clone(&store);
            thread::spawn(move || {
                for index in 0..100 {
                    shared.complete(seq(11), reply(&format!("{tag}{index}")));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    let mut last = std::collections::HashMap::new();
    for _ in 0..200 {
        let received = stream.next_reply(LONG).expect("notification");
        let text = String::from_utf8(received.payload().as_bytes().to_vec()).expect("utf8");
        let (tag, number) = text.split_at(1);
        let value: i32 = number.parse().expect("number");
        let previous = last.insert(tag.to_owned(), value).unwrap_or(-1);
        assert!(value > previous, "{tag} went from {previous} to {value}");
    }
}

#[rstest]
fn store_wait_on_subscription_sees_only_later_values(harness: Harness) {
    let _stream = subscription(&harness.store, seq(12));
    assert!(harness.store.complete(seq(12), reply("before")));

    let store = Arc::new(harness.store);
    let shared = Arc::clone(&store);
    let waiter = thread::spawn(move || shared.wait(seq(12), LONG));
    thread::sleep(SHORT);
    assert!(store.complete(seq(12), reply("after")));
    let received = waiter.join().expect("waiter panicked").expect("reply");
    assert_eq!(received.payload().as_bytes(), b"after");
}

#[rstest]
fn unregister_closes_subscription(harness: Harness) {
    let stream = subscription(&harness.store, seq(13));
    assert!(harness.store.unregister(seq(13)));
    assert!(!harness.store.contains(seq(13)));
    assert!(matches!(stream.next_reply(SHORT), Err(WaitError::Closed { .. })));
    assert!(!harness.store.unregister(seq(13)));
}

struct ChannelListener {
    sender: parking_lot::Mutex<mpsc::Sender<Result<String, ErrorCode>>>,
}

impl ReplyListener for ChannelListener {
    fn on_reply(&self, reply: Reply) {
        let text = String::from_utf8_lossy(reply.payload().as_bytes()).into_owned();
        drop(self.sender.lock().send(Ok(text)));
    }

    fn on_error(&self, error: ErrorMessage) {
        drop(self.sender.lock().send(Err(error.code())));
    }
}

#[rstest]
fn async_listener_receives_every_value_then_the_error(harness: Harness) {
    let _stream = subscription(&harness.store, seq(14));
    let (sender, receiver) = mpsc::channel();
    let listener = Arc::new(ChannelListener {
        sender: parking_lot::Mutex::new(sender),
    });
    harness
        .store
        .subscribe(seq(14), listener)
        .expect("subscribe");

    harness.store.complete(seq(14), reply("1"));
    harness.store.complete(seq(14), reply("2"));
    harness
        .store
        .complete_with_error(ErrorMessage::new(ErrorCode::TargetNotFound, seq(14)));

    assert_eq!(receiver.recv_timeout(LONG).expect("first"), Ok("1".to_owned()));
    assert_eq!(receiver.recv_timeout(LONG).expect("second"), Ok("2".to_owned()));
    assert_eq!(
        receiver.recv_timeout(LONG).expect("error"),
        Err(ErrorCode::TargetNotFound)
    );
}

#[rstest]
fn subscribe_rejects_single_shot_entries(harness: Harness) {
    let _handle = pending(&harness.store, seq(15));
    let (sender, _receiver) = mpsc::channel();
    let listener = Arc::new(ChannelListener {
        sender: parking_lot::Mutex::new(sender),
    });
    assert!(matches!(
        harness.store.subscribe(seq(15), listener),
        Err(WaitError::NotRepeating { .. })
    ));
}

#[rstest]
fn idle_one_shot_is_swept_after_threshold(harness: Harness) {
    let handle = pending(&harness.store, seq(20));
    harness.clock.advance(Duration::from_secs(39));
    assert!(harness.store.sweep_idle().is_empty());

    harness.clock.advance(Duration::from_secs(2));
    assert_eq!(harness.store.sweep_idle(), vec![seq(20)]);
    assert!(!harness.store.contains(seq(20)));
    assert!(matches!(
        handle.wait(SHORT),
        Err(WaitError::Cancelled { .. })
    ));
}

#[rstest]
fn attached_waiter_resets_idle_time(harness: Harness) {
    let handle = pending(&harness.store, seq(21));
    harness.clock.advance(Duration::from_secs(30));
    assert!(matches!(
        handle.wait(SHORT),
        Err(WaitError::Timeout { .. })
    ));
    harness.clock.advance(Duration::from_secs(30));
    assert!(harness.store.sweep_idle().is_empty());
    assert!(harness.store.contains(seq(21)));
}

#[rstest]
fn subscriptions_are_never_swept(harness: Harness) {
    let _stream = subscription(&harness.store, seq(22));
    harness.clock.advance(Duration::from_secs(3600));
    assert!(harness.store.sweep_idle().is_empty());
    assert!(harness.store.contains(seq(22)));
}

#[rstest]
fn origin_is_recorded(harness: Harness) {
    let _stream = harness
        .store
        .register(seq(23), HandleKind::Repeating, Protocol::new("mqtt"))
        .expect("register");
    assert_eq!(harness.store.origin(seq(23)), Some(Protocol::new("mqtt")));
    assert_eq!(harness.store.origin(seq(24)), None);
}
