//! Tests for per-contact turn serialisation.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use zapdesk::conversation::replies;
use zapdesk::conversation::router::{ConversationRouter, DEFAULT_SESSION_BUFFER};
use zapdesk::types::ClassifiedMessage;

use crate::support::{CountingNlu, Fixture, RecordingAction, LINKED, UNLINKED};

fn message(sender_id: &str, text: &str) -> ClassifiedMessage {
    ClassifiedMessage {
        sender_id: sender_id.to_owned(),
        text: text.to_owned(),
        timestamp_seconds: 1_700_000_000,
    }
}

async fn wait_for_replies(f: &Fixture, expected: usize) {
    for _ in 0..2000 {
        if f.replier.count() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {expected} replies, got {}", f.replier.count());
}

fn router_with(f: &Fixture, buffer: usize, idle: Duration) -> Arc<ConversationRouter> {
    Arc::new(ConversationRouter::new(Arc::clone(&f.engine), buffer).with_idle_timeout(idle))
}

fn router_for(f: &Fixture) -> Arc<ConversationRouter> {
    Arc::new(ConversationRouter::new(
        Arc::clone(&f.engine),
        DEFAULT_SESSION_BUFFER,
    ))
}

#[tokio::test(start_paused = true)]
async fn same_sender_turns_never_overlap() {
    let f = Fixture::build(
        CountingNlu::with_delay(Duration::from_millis(50)),
        RecordingAction::default(),
    );
    let router = router_for(&f);

    for text in ["oi", "ajuda", "oi"] {
        router.route(message(LINKED, text)).await.expect("route");
    }
    wait_for_replies(&f, 3).await;

    assert_eq!(f.nlu.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(router.worker_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn different_senders_run_concurrently() {
    let f = Fixture::build(
        CountingNlu::with_delay(Duration::from_millis(50)),
        RecordingAction::default(),
    );
    let router = router_for(&f);

    router.route(message(LINKED, "oi")).await.expect("route");
    router.route(message(UNLINKED, "oi")).await.expect("route");
    wait_for_replies(&f, 2).await;

    assert_eq!(f.nlu.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(router.worker_count().await, 2);
}

#[tokio::test]
async fn replies_follow_arrival_order() {
    let f = Fixture::new();
    let router = router_for(&f);

    router.route(message(LINKED, "oi")).await.expect("route");
    router.route(message(LINKED, "ajuda")).await.expect("route");
    wait_for_replies(&f, 2).await;

    assert_eq!(
        f.replier.texts_to(LINKED),
        vec![replies::GREETING.to_owned(), replies::HELP.to_owned()]
    );
}

#[tokio::test]
async fn shutdown_all_drops_every_worker() {
    let f = Fixture::new();
    let router = router_for(&f);

    router.route(message(LINKED, "oi")).await.expect("route");
    router.route(message(UNLINKED, "oi")).await.expect("route");
    assert_eq!(router.worker_count().await, 2);

    router.shutdown_all().await;
    assert_eq!(router.worker_count().await, 0);

    // A new message after shutdown gets a fresh worker.
    router.route(message(LINKED, "ajuda")).await.expect("route");
    assert_eq!(router.worker_count().await, 1);
}

#[tokio::test]
async fn run_returns_when_inbound_closes() {
    let f = Fixture::new();
    let router = router_for(&f);
    let (tx, rx) = mpsc::channel(8);

    let task = tokio::spawn(Arc::clone(&router).run(rx));
    tx.send(message(LINKED, "oi")).await.expect("send");
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("router should stop")
        .expect("router task");
    wait_for_replies(&f, 1).await;
    assert_eq!(f.replier.texts_to(LINKED), vec![replies::GREETING.to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn saturated_sender_does_not_delay_others() {
    let f = Fixture::build(
        CountingNlu::with_delay(Duration::from_secs(10)),
        RecordingAction::default(),
    );
    let router = router_with(&f, 1, Duration::from_secs(3600));
    let (tx, rx) = mpsc::channel(8);
    let _task = tokio::spawn(Arc::clone(&router).run(rx));

    let started = Instant::now();
    for _ in 0..5 {
        tx.send(message(LINKED, "oi")).await.expect("send");
    }
    tx.send(message(UNLINKED, "oi")).await.expect("send");

    while f.replier.texts_to(UNLINKED).is_empty() {
        assert!(
            started.elapsed() < Duration::from_secs(15),
            "second sender waited behind the first"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(f.replier.texts_to(UNLINKED), vec![replies::LINK_REQUIRED.to_owned()]);

    // The backlog still reaches the busy sender, in order.
    while f.replier.texts_to(LINKED).len() < 5 {
        assert!(started.elapsed() < Duration::from_secs(120), "backlog stalled");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(f.replier.texts_to(LINKED), vec![replies::GREETING.to_owned(); 5]);
    assert_eq!(f.nlu.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn backlog_keeps_arrival_order() {
    let f = Fixture::build(
        CountingNlu::with_delay(Duration::from_millis(50)),
        RecordingAction::default(),
    );
    let router = router_with(&f, 1, Duration::from_secs(3600));

    for text in ["oi", "ajuda", "oi", "ajuda"] {
        router.route(message(LINKED, text)).await.expect("route");
    }
    wait_for_replies(&f, 4).await;

    assert_eq!(
        f.replier.texts_to(LINKED),
        vec![
            replies::GREETING.to_owned(),
            replies::HELP.to_owned(),
            replies::GREETING.to_owned(),
            replies::HELP.to_owned(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn idle_worker_exits_and_is_replaced() {
    let f = Fixture::new();
    let router = router_with(&f, DEFAULT_SESSION_BUFFER, Duration::from_secs(60));

    router.route(message(LINKED, "oi")).await.expect("route");
    wait_for_replies(&f, 1).await;
    assert_eq!(router.worker_count().await, 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(router.worker_count().await, 0);

    router.route(message(LINKED, "ajuda")).await.expect("route");
    wait_for_replies(&f, 2).await;
    assert_eq!(router.worker_count().await, 1);
    assert_eq!(
        f.replier.texts_to(LINKED),
        vec![replies::GREETING.to_owned(), replies::HELP.to_owned()]
    );
}
