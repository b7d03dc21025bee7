//! Shared helpers for nostr-client integration tests.
//!
//! [`MockRelays`] is an in-memory [`Transport`]: it records every frame the
//! client sends and lets a test inject relay frames, server-side closes and
//! connect failures per relay URL.

#![allow(dead_code)]

use async_trait::async_trait;
use nostr::Event;
use nostr_client::{
    ClientError, Connection, FrameSink, NoReconnect, PoolConfig, RelayPool, Result, Transport,
    TransportEvent,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
struct MockState {
    inbound: HashMap<String, mpsc::UnboundedSender<TransportEvent>>,
    sent: HashMap<String, Vec<String>>,
    client_closes: HashMap<String, Vec<String>>,
    connects: HashMap<String, usize>,
    refused: HashSet<String>,
}

/// Scripted relays behind an in-memory transport.
#[derive(Clone, Default)]
pub struct MockRelays {
    state: Arc<Mutex<MockState>>,
}

fn key(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

impl MockRelays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future connects to `url` fail.
    pub fn refuse(&self, url: &str) {
        self.state.lock().refused.insert(key(url));
    }

    pub fn allow(&self, url: &str) {
        self.state.lock().refused.remove(&key(url));
    }

    pub fn connect_count(&self, url: &str) -> usize {
        self.state.lock().connects.get(&key(url)).copied().unwrap_or(0)
    }

    /// Every frame the client sent to `url`, across connections.
    pub fn frames(&self, url: &str) -> Vec<Value> {
        self.state
            .lock()
            .sent
            .get(&key(url))
            .map(|frames| {
                frames
                    .iter()
                    .filter_map(|f| serde_json::from_str(f).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Frames of one type (`"REQ"`, `"CLOSE"`, `"EVENT"`, `"AUTH"`).
    pub fn frames_of(&self, url: &str, kind: &str) -> Vec<Value> {
        self.frames(url)
            .into_iter()
            .filter(|f| f[0] == kind)
            .collect()
    }

    /// Number of REQ frames for `subscription_id` sent to `url`.
    pub fn req_count(&self, url: &str, subscription_id: &str) -> usize {
        self.frames_of(url, "REQ")
            .iter()
            .filter(|f| f[1] == subscription_id)
            .count()
    }

    pub fn close_count(&self, url: &str, subscription_id: &str) -> usize {
        self.frames_of(url, "CLOSE")
            .iter()
            .filter(|f| f[1] == subscription_id)
            .count()
    }

    /// Reasons the client gave when closing connections to `url`.
    pub fn client_closes(&self, url: &str) -> Vec<String> {
        self.state
            .lock()
            .client_closes
            .get(&key(url))
            .cloned()
            .unwrap_or_default()
    }

    /// Deliver a raw text frame from `url` to the client.
    pub fn inject(&self, url: &str, frame: impl Into<String>) {
        let tx = self.state.lock().inbound.get(&key(url)).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Message(frame.into()));
        }
    }

    pub fn send_event(&self, url: &str, subscription_id: &str, event: &Event) {
        self.inject(url, json!(["EVENT", subscription_id, event]).to_string());
    }

    pub fn send_eose(&self, url: &str, subscription_id: &str) {
        self.inject(url, json!(["EOSE", subscription_id]).to_string());
    }

    pub fn send_ok(&self, url: &str, event_id: &str, accepted: bool, message: &str) {
        self.inject(url, json!(["OK", event_id, accepted, message]).to_string());
    }

    pub fn send_closed(&self, url: &str, subscription_id: &str, message: &str) {
        self.inject(url, json!(["CLOSED", subscription_id, message]).to_string());
    }

    /// Drop the connection to `url` from the relay side.
    pub fn server_close(&self, url: &str, reason: &str) {
        let tx = self.state.lock().inbound.remove(&key(url));
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::ClosedByServer(reason.to_string()));
        }
    }

    /// Subscription id of the most recent REQ sent to `url`.
    pub fn last_req_id(&self, url: &str) -> Option<String> {
        self.frames_of(url, "REQ")
            .last()
            .and_then(|f| f[1].as_str().map(str::to_string))
    }
}

struct MockSink {
    url: String,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.state
            .lock()
            .sent
            .entry(self.url.clone())
            .or_default()
            .push(text);
        Ok(())
    }

    async fn close(&mut self, reason: &str) -> Result<()> {
        let mut state = self.state.lock();
        state
            .client_closes
            .entry(self.url.clone())
            .or_default()
            .push(reason.to_string());
        state.inbound.remove(&self.url);
        Ok(())
    }
}

#[async_trait]
impl Transport for MockRelays {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        let url = key(url.as_str());
        let mut state = self.state.lock();
        *state.connects.entry(url.clone()).or_default() += 1;
        if state.refused.contains(&url) {
            return Err(ClientError::Transport(format!("connection refused: {}", url)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.inbound.insert(url.clone(), tx);
        Ok(Connection {
            sink: Box::new(MockSink {
                url,
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }
}

/// Pool over `relays` with reconnection disabled.
pub fn pool(relays: &MockRelays) -> RelayPool {
    RelayPool::builder()
        .config(PoolConfig::default())
        .transport(relays.clone())
        .reconnect_policy(NoReconnect)
        .build()
}

/// Pool with every URL in `urls` added and connected.
pub async fn connected_pool(relays: &MockRelays, urls: &[&str]) -> RelayPool {
    init_tracing();
    let pool = pool(relays);
    for url in urls {
        pool.ensure_relay(url).await.unwrap();
    }
    pool
}

/// Let reader and writer tasks drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Poll `check` until it holds, failing the test after a while.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub fn note(id: &str, created_at: u64) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "f".repeat(64),
        created_at,
        kind: 1,
        tags: vec![],
        content: format!("note {}", id),
        sig: "0".repeat(128),
    }
}
