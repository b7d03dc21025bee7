//! Subscriptions replicated across several scripted relays.

mod common;

use common::*;
use nostr::Filter;
use nostr_client::{ClientError, SubscriptionStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const A: &str = "wss://a.relay.test";
const B: &str = "wss://b.relay.test";
const C: &str = "wss://c.relay.test";

#[tokio::test]
async fn test_subscribe_does_not_send_req_until_open() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B]).await;

    let sub = pool.subscribe(vec![Filter::new().kinds([1])]).unwrap();
    settle().await;
    assert_eq!(sub.status(), SubscriptionStatus::Created);
    assert!(relays.frames_of(A, "REQ").is_empty());

    let opened = Arc::new(AtomicUsize::new(0));
    let o = Arc::clone(&opened);
    sub.add_open_listener(move |_| {
        o.fetch_add(1, Ordering::SeqCst);
    });

    sub.open().unwrap();
    sub.open().unwrap();
    settle().await;

    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(relays.req_count(A, sub.id()), 1);
    assert_eq!(relays.req_count(B, sub.id()), 1);
    assert_eq!(
        relays.frames_of(A, "REQ")[0],
        serde_json::json!(["REQ", sub.id(), {"kinds": [1]}])
    );
}

#[tokio::test]
async fn test_eose_everywhere_reported_by_last_relay() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B, C]).await;
    let sub = pool.subscribe(vec![Filter::new()]).unwrap();

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    sub.add_eose_listener(move |_, relay, everywhere| {
        sink.lock().push((relay.to_string(), everywhere));
    });
    sub.open().unwrap();
    settle().await;

    relays.send_eose(B, sub.id());
    settle().await;
    relays.send_eose(A, sub.id());
    settle().await;
    assert!(!sub.is_eose_everywhere());

    relays.send_eose(C, sub.id());
    settle().await;

    assert_eq!(
        reports.lock().clone(),
        vec![
            (B.to_string(), false),
            (A.to_string(), false),
            (C.to_string(), true),
        ]
    );
    assert!(sub.wait_for_eose().await);
}

#[tokio::test]
async fn test_event_from_many_relays_delivered_once() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B, C]).await;
    let sub = pool.subscribe(vec![Filter::new().kinds([1])]).unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    sub.add_event_listener(move |_, event, stored| {
        sink.lock().push((event.id.clone(), stored));
    });
    sub.open().unwrap();
    settle().await;

    let event = note("e1", 100);
    for url in [A, B, C] {
        relays.send_event(url, sub.id(), &event);
    }
    relays.send_eose(A, sub.id());
    settle().await;
    relays.send_event(A, sub.id(), &note("e2", 200));
    relays.send_event(B, sub.id(), &note("e2", 200));
    settle().await;

    let delivered = delivered.lock().clone();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0], ("e1".to_string(), true));
    assert_eq!(delivered[1].0, "e2");
    // e2 was stored on B (no EOSE yet) but live on A; whichever relay won decides.
    assert_eq!(sub.seen_count(), 2);
    assert!(pool.store().get("e1").is_some());
}

#[tokio::test]
async fn test_close_is_idempotent_and_sends_close_once() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B]).await;
    let sub = pool.subscribe(vec![Filter::new()]).unwrap();

    let closes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&closes);
    sub.add_close_listener(move |_, reasons| sink.lock().push(reasons.to_vec()));
    sub.open().unwrap();
    settle().await;

    sub.close_with_reason("user left");
    sub.close();
    settle().await;

    assert_eq!(closes.lock().clone(), vec![vec!["user left".to_string()]]);
    assert_eq!(relays.close_count(A, sub.id()), 1);
    assert_eq!(relays.close_count(B, sub.id()), 1);
    assert!(!pool.relay(A).unwrap().has_subscription(sub.id()));
    assert!(pool.subscription_ids().is_empty());

    // Frames that arrive after CLOSE are ignored.
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    sub.add_event_listener(move |_, _, _| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    relays.send_event(A, sub.id(), &note("late", 1));
    relays.send_eose(A, sub.id());
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(matches!(sub.open(), Err(ClientError::SubscriptionClosed(_))));
}

#[tokio::test]
async fn test_relay_closed_reasons_are_reported_on_close() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B]).await;
    let sub = pool.subscribe(vec![Filter::new()]).unwrap();

    let closes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&closes);
    sub.add_close_listener(move |_, reasons| sink.lock().push(reasons.to_vec()));
    sub.open().unwrap();
    settle().await;

    relays.send_closed(A, sub.id(), "rate-limited: slow down");
    settle().await;
    assert!(sub.is_open());
    assert_eq!(sub.relay_urls(), vec![B.to_string()]);

    sub.close_with_reason("done");
    settle().await;

    assert_eq!(
        closes.lock().clone(),
        vec![vec![
            "done".to_string(),
            "rate-limited: slow down".to_string()
        ]]
    );
    // A already dropped the subscription, so only B gets a CLOSE.
    assert_eq!(relays.close_count(A, sub.id()), 0);
    assert_eq!(relays.close_count(B, sub.id()), 1);
}

#[tokio::test]
async fn test_removing_relay_keeps_other_relays_flowing() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B, C]).await;
    let sub = pool.subscribe(vec![Filter::new()]).unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    sub.add_event_listener(move |_, event, _| sink.lock().push(event.id.clone()));
    sub.open().unwrap();
    settle().await;

    relays.send_eose(A, sub.id());
    relays.send_eose(B, sub.id());
    relays.send_event(C, sub.id(), &note("e1", 1));
    settle().await;
    assert!(!sub.is_eose_everywhere());

    // C was the last relay without EOSE.
    assert!(pool.remove_relay(C).unwrap());
    settle().await;

    assert!(sub.is_eose_everywhere());
    assert!(sub.wait_for_eose().await);
    assert_eq!(relays.close_count(C, sub.id()), 1);
    assert_eq!(relays.client_closes(C), vec!["removed from pool".to_string()]);
    assert_eq!(sub.relay_urls(), vec![A.to_string(), B.to_string()]);

    relays.send_event(A, sub.id(), &note("e2", 2));
    settle().await;
    assert_eq!(delivered.lock().clone(), vec!["e1".to_string(), "e2".to_string()]);
    assert_eq!(relays.req_count(A, sub.id()), 1);
}

#[tokio::test]
async fn test_relay_added_after_open_gets_req() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A]).await;
    let sub = pool.subscribe(vec![Filter::new()]).unwrap();
    sub.open().unwrap();
    settle().await;
    relays.send_eose(A, sub.id());
    settle().await;
    assert!(sub.is_eose_everywhere());

    pool.ensure_relay(B).await.unwrap();
    // Adding a relay that is already present changes nothing.
    pool.ensure_relay(B).await.unwrap();
    settle().await;

    assert_eq!(relays.req_count(B, sub.id()), 1);
    assert_eq!(relays.req_count(A, sub.id()), 1);
    assert!(!sub.is_eose_everywhere());

    relays.send_eose(B, sub.id());
    settle().await;
    assert!(sub.is_eose_everywhere());
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A]).await;
    let sub = pool.subscribe(vec![Filter::new()]).unwrap();
    let mut stream = sub.stream();
    sub.open().unwrap();
    settle().await;

    relays.inject(A, "not json at all");
    relays.inject(A, r#"["EVENT"]"#);
    relays.inject(A, r#"["EVENT","x",{"id":42}]"#);
    relays.inject(A, r#"["WHAT","ever"]"#);
    relays.inject(A, "{}");
    relays.send_event(A, sub.id(), &note("good", 1));
    settle().await;

    assert!(pool.is_connected(A));
    match stream.recv().await {
        Some(nostr_client::SubscriptionEvent::Event { event, stored }) => {
            assert_eq!(event.id, "good");
            assert!(stored);
        }
        other => panic!("expected event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_events_not_matching_filters_are_dropped() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A]).await;
    let sub = pool
        .subscribe(vec![Filter::new().kinds([1]).authors(["f".repeat(64)])])
        .unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&delivered);
    sub.add_event_listener(move |_, _, _| {
        d.fetch_add(1, Ordering::SeqCst);
    });
    sub.open().unwrap();
    settle().await;

    let mut wrong_kind = note("k7", 1);
    wrong_kind.kind = 7;
    let mut wrong_author = note("other", 1);
    wrong_author.pubkey = "a".repeat(64);

    relays.send_event(A, sub.id(), &wrong_kind);
    relays.send_event(A, sub.id(), &wrong_author);
    relays.send_event(A, sub.id(), &note("ok", 1));
    settle().await;

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_live_only_subscription_receives_new_events() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A]).await;
    let sub = pool
        .subscribe(vec![Filter::new().kinds([1]).limit(0)])
        .unwrap();
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    sub.add_event_listener(move |_, event, stored| {
        sink.lock().push((event.id.clone(), stored));
    });
    sub.open().unwrap();
    settle().await;

    relays.send_eose(A, sub.id());
    relays.send_event(A, sub.id(), &note("live", 10));
    settle().await;

    assert_eq!(delivered.lock().clone(), vec![("live".to_string(), false)]);
}

#[tokio::test]
async fn test_removing_only_relay_ends_wait_for_eose() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A]).await;
    let sub = pool.subscribe(vec![Filter::new()]).unwrap();
    sub.open().unwrap();
    settle().await;

    assert!(pool.remove_relay(A).unwrap());

    assert!(sub.is_open());
    assert!(sub.is_eose_everywhere());
    let done = tokio::time::timeout(std::time::Duration::from_secs(1), sub.wait_for_eose())
        .await
        .unwrap();
    assert!(done);
}
