//! Pool-level aggregation: fetch, publish, notices and authentication.

mod common;

use async_trait::async_trait;
use common::*;
use nostr::{Event, Filter, KIND_CLIENT_AUTH};
use nostr_client::{
    AuthSigner, ClientError, NoReconnect, PoolConfig, PoolEvent, PublishPolicy, RelayPool,
    RelayStatus, Result,
};
use std::time::Duration;
use tokio::time::Instant;

const A: &str = "wss://a.relay.test";
const B: &str = "wss://b.relay.test";
const C: &str = "wss://c.relay.test";

/// Answer the first REQ on A and B with stored events and EOSE; C stays silent.
fn answer_two_of_three(relays: &MockRelays) {
    let relays = relays.clone();
    tokio::spawn(async move {
        eventually("REQ on every relay", || {
            [A, B, C].iter().all(|url| relays.last_req_id(url).is_some())
        })
        .await;
        let id = relays.last_req_id(A).unwrap();

        relays.send_event(A, &id, &note("e1", 100));
        relays.send_eose(A, &id);
        relays.send_event(B, &id, &note("e2", 200));
        relays.send_event(B, &id, &note("e1", 100));
        relays.send_eose(B, &id);
    });
}

#[tokio::test(start_paused = true)]
async fn test_fetch_returns_partial_results_at_deadline() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B, C]).await;
    answer_two_of_three(&relays);

    let started = Instant::now();
    let fetched = pool
        .fetch(vec![Filter::new().kinds([1])], Some(Duration::from_secs(2)))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
    assert!(!fetched.complete);
    let ids: Vec<&str> = fetched.events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e2", "e1"]);

    // The fetch subscription is closed everywhere but connections stay up.
    settle().await;
    let id = relays.last_req_id(C).unwrap();
    assert_eq!(relays.close_count(C, &id), 1);
    assert_eq!(pool.connected_count(), 3);
    assert!(pool.subscription_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_completes_on_eose_everywhere() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B]).await;

    let responder = relays.clone();
    tokio::spawn(async move {
        eventually("REQ", || responder.last_req_id(B).is_some()).await;
        let id = responder.last_req_id(B).unwrap();
        responder.send_event(A, &id, &note("e1", 1));
        responder.send_eose(A, &id);
        responder.send_eose(B, &id);
    });

    let started = Instant::now();
    let fetched = pool
        .fetch(vec![Filter::new()], Some(Duration::from_secs(30)))
        .await
        .unwrap();

    assert!(fetched.complete);
    assert_eq!(fetched.events.len(), 1);
    assert!(started.elapsed() < Duration::from_secs(30));
}

/// Answer the EVENT on each relay with the given OK outcome.
fn answer_publish(relays: &MockRelays, answers: Vec<(&'static str, bool, &'static str)>) {
    let relays = relays.clone();
    tokio::spawn(async move {
        for (url, accepted, message) in answers {
            eventually("EVENT frame", || !relays.frames_of(url, "EVENT").is_empty()).await;
            let frame = relays.frames_of(url, "EVENT").remove(0);
            let event_id = frame[1]["id"].as_str().unwrap().to_string();
            relays.send_ok(url, &event_id, accepted, message);
        }
    });
}

#[tokio::test]
async fn test_publish_any_succeeds_with_one_acceptance() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B, C]).await;
    answer_publish(
        &relays,
        vec![
            (B, false, "blocked: spam"),
            (C, false, "invalid: bad signature"),
            (A, true, ""),
        ],
    );

    let outcome = pool
        .publish(note("p1", 1), PublishPolicy::Any)
        .await
        .unwrap();

    assert_eq!(outcome.event_id, "p1");
    assert_eq!(outcome.accepted_count(), 1);
    assert_eq!(outcome.accepted(), vec![A]);
}

#[tokio::test]
async fn test_publish_all_fails_and_exposes_rejections() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B, C]).await;
    answer_publish(
        &relays,
        vec![
            (A, true, ""),
            (B, false, "blocked: spam"),
            (C, false, "invalid: bad signature"),
        ],
    );

    let err = pool
        .publish(note("p1", 1), PublishPolicy::All)
        .await
        .unwrap_err();

    match err {
        ClientError::PublishRejected { required, outcome } => {
            assert_eq!(required, 3);
            assert_eq!(outcome.accepted_count(), 1);
            assert_eq!(
                outcome.failures(),
                vec![(B, "blocked: spam"), (C, "invalid: bad signature")]
            );
        }
        other => panic!("expected PublishRejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_isolates_unreachable_relay() {
    let relays = MockRelays::new();
    relays.refuse(C);
    let pool = connected_pool(&relays, &[A, B]).await;
    assert!(pool.ensure_relay(C).await.is_err());
    answer_publish(&relays, vec![(A, true, ""), (B, true, "")]);

    let outcome = pool
        .publish(note("p1", 1), PublishPolicy::AtLeast(2))
        .await
        .unwrap();

    assert_eq!(outcome.accepted_count(), 2);
    assert!(matches!(outcome.status(C), Some(RelayStatus::Failed(_))));
}

#[tokio::test(start_paused = true)]
async fn test_publish_deadline_leaves_silent_relays_pending() {
    let relays = MockRelays::new();
    let pool = RelayPool::builder()
        .config(PoolConfig {
            publish_timeout: Duration::from_secs(1),
            ..Default::default()
        })
        .transport(relays.clone())
        .reconnect_policy(NoReconnect)
        .build();
    pool.ensure_relay(A).await.unwrap();
    pool.ensure_relay(B).await.unwrap();
    answer_publish(&relays, vec![(A, true, "")]);

    let err = pool
        .publish(note("p1", 1), PublishPolicy::All)
        .await
        .unwrap_err();

    let ClientError::PublishRejected { outcome, .. } = err else {
        panic!("expected PublishRejected");
    };
    assert_eq!(outcome.status(A), Some(&RelayStatus::Accepted(String::new())));
    assert_eq!(outcome.status(B), Some(&RelayStatus::Pending));
    // Timing out the aggregate does not drop connections.
    assert_eq!(pool.connected_count(), 2);
}

#[tokio::test]
async fn test_publish_to_targets_only_listed_relays() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B]).await;
    answer_publish(&relays, vec![(B, true, "")]);

    let outcome = pool
        .publish_to(note("p1", 1), &[B], PublishPolicy::All)
        .await
        .unwrap();

    assert_eq!(outcome.accepted(), vec![B]);
    assert!(relays.frames_of(A, "EVENT").is_empty());
    assert!(matches!(
        pool.publish_to(note("p2", 1), &["wss://unknown.test"], PublishPolicy::Any)
            .await,
        Err(ClientError::InvalidUrl(_))
    ));
}

#[tokio::test]
async fn test_publish_to_sends_once_per_relay() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A, B]).await;
    answer_publish(&relays, vec![(B, true, "")]);

    let outcome = pool
        .publish_to(note("p1", 1), &[B, "wss://B.relay.test/"], PublishPolicy::All)
        .await
        .unwrap();

    assert_eq!(outcome.accepted(), vec![B]);
    assert_eq!(outcome.statuses.len(), 1);
    assert_eq!(relays.frames_of(B, "EVENT").len(), 1);
}

#[tokio::test]
async fn test_notice_is_broadcast() {
    let relays = MockRelays::new();
    let pool = connected_pool(&relays, &[A]).await;
    let mut notifications = pool.notifications();

    relays.inject(A, r#"["NOTICE","maintenance at noon"]"#);

    let event = tokio::time::timeout(Duration::from_secs(1), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        PoolEvent::Notice {
            relay_url: A.to_string(),
            message: "maintenance at noon".to_string(),
        }
    );
}

struct TestSigner;

#[async_trait]
impl AuthSigner for TestSigner {
    async fn sign_auth(&self, relay_url: &str, challenge: &str) -> Result<Event> {
        Ok(Event {
            id: format!("auth-{}", challenge),
            pubkey: "f".repeat(64),
            created_at: 1,
            kind: KIND_CLIENT_AUTH,
            tags: vec![
                vec!["relay".to_string(), relay_url.to_string()],
                vec!["challenge".to_string(), challenge.to_string()],
            ],
            content: String::new(),
            sig: "0".repeat(128),
        })
    }
}

#[tokio::test]
async fn test_auth_challenge_is_signed_and_sent() {
    let relays = MockRelays::new();
    let pool = RelayPool::builder()
        .transport(relays.clone())
        .reconnect_policy(NoReconnect)
        .signer(TestSigner)
        .build();
    let mut notifications = pool.notifications();
    pool.ensure_relay(A).await.unwrap();

    relays.inject(A, r#"["AUTH","challenge-123"]"#);
    eventually("AUTH frame", || !relays.frames_of(A, "AUTH").is_empty()).await;

    let frame = relays.frames_of(A, "AUTH").remove(0);
    assert_eq!(frame[1]["kind"], 22242);
    assert_eq!(frame[1]["tags"][1][1], "challenge-123");
    assert_eq!(frame[1]["tags"][0][1], A);

    relays.send_ok(A, "auth-challenge-123", true, "");
    let relay = pool.relay(A).unwrap();
    eventually("auth ack", || relay.pending_acks() == 0).await;

    let mut saw_auth = false;
    while let Ok(event) = notifications.try_recv() {
        assert!(!matches!(event, PoolEvent::Error { .. }), "unexpected {:?}", event);
        if matches!(event, PoolEvent::Auth { ref challenge, .. } if challenge == "challenge-123") {
            saw_auth = true;
        }
    }
    assert!(saw_auth);
}

struct FailingSigner;

#[async_trait]
impl AuthSigner for FailingSigner {
    async fn sign_auth(&self, _relay_url: &str, _challenge: &str) -> Result<Event> {
        Err(ClientError::Protocol("key locked".to_string()))
    }
}

#[tokio::test]
async fn test_auth_signer_failure_is_reported() {
    let relays = MockRelays::new();
    let pool = RelayPool::builder()
        .transport(relays.clone())
        .reconnect_policy(NoReconnect)
        .signer(FailingSigner)
        .build();
    let mut notifications = pool.notifications();
    pool.ensure_relay(A).await.unwrap();

    relays.inject(A, r#"["AUTH","challenge-9"]"#);

    let error = loop {
        let event = tokio::time::timeout(Duration::from_secs(1), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        if let PoolEvent::Error { relay_url, error } = event {
            assert_eq!(relay_url, A);
            break error;
        }
    };
    assert_eq!(error, "Signer error: Protocol error: key locked");
    assert!(relays.frames_of(A, "AUTH").is_empty());
}
