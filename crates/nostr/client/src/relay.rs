//! Single relay connection management
//!
//! A [`Relay`] owns one connection. It turns pool-level operations into
//! protocol frames, demultiplexes inbound frames to a [`RelayHandler`], and
//! owns the [`MessageAck`]s of messages still waiting for a terminal
//! response. It never reconnects on its own; that decision belongs to the
//! pool.

use crate::ack::{MessageAck, PendingAck};
use crate::error::{ClientError, Result};
use crate::message::{AckKey, ClientMessage, RelayMessage};
use crate::transport::{Connection, FrameSink, Transport, TransportEvent};
use nostr::Event;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Disconnected
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
}

/// Relay connection configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// How long a message waits for OK/EOSE/CLOSED before its ack fails
    pub ack_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// Receives a relay's inbound traffic and connection changes.
///
/// Callbacks run on the relay's reader task and must not block.
pub trait RelayHandler: Send + Sync {
    /// A new connection was established
    fn on_connect(&self, _relay: &Arc<Relay>) {}

    /// EVENT for a subscription replicated to this relay
    fn on_event(&self, _relay: &Arc<Relay>, _subscription_id: &str, _event: Event) {}

    /// EOSE for a subscription replicated to this relay
    fn on_eose(&self, _relay: &Arc<Relay>, _subscription_id: &str) {}

    /// Relay-initiated CLOSED; the relay has already forgotten the id
    fn on_closed(&self, _relay: &Arc<Relay>, _subscription_id: &str, _message: &str) {}

    fn on_notice(&self, _relay: &Arc<Relay>, _message: &str) {}

    /// NIP-42 authentication challenge
    fn on_auth(&self, _relay: &Arc<Relay>, _challenge: &str) {}

    /// The connection dropped without the client asking for it
    fn on_disconnect(&self, _relay: &Arc<Relay>, _reason: &str) {}
}

/// Normalize a relay URL so the same relay always maps to the same key.
///
/// Only `ws` and `wss` are accepted. The host is lower-cased, a default port
/// is dropped and a bare trailing `/` is removed.
pub fn normalize_relay_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url.trim())?;

    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ClientError::InvalidUrl(format!("missing host: {}", url)));
    }
    parsed.set_fragment(None);

    let mut normalized = parsed.to_string();
    if parsed.path() == "/" && parsed.query().is_none() {
        normalized.pop();
    }
    Ok(normalized)
}

enum Outbound {
    Frame(String),
    Close(String),
}

/// One relay connection
pub struct Relay {
    /// Normalized relay URL
    url: String,
    /// Parsed URL handed to the transport
    endpoint: Url,
    config: RelayConfig,
    transport: Arc<dyn Transport>,
    state: RwLock<ConnectionState>,
    /// Queue drained by the writer task of the current connection
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    /// Messages waiting for OK/EOSE/CLOSED
    pending_acks: Mutex<HashMap<AckKey, Arc<MessageAck>>>,
    /// Subscription ids currently replicated to this relay
    subscriptions: Mutex<HashSet<String>>,
    connect_lock: tokio::sync::Mutex<()>,
    handler: RwLock<Option<Weak<dyn RelayHandler>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every connect and disconnect so stale tasks are ignored
    generation: AtomicU64,
}

impl Relay {
    /// Create a relay (does not connect yet)
    pub fn new(url: &str, config: RelayConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let url = normalize_relay_url(url)?;
        let endpoint = Url::parse(&url)?;

        Ok(Arc::new(Self {
            url,
            endpoint,
            config,
            transport,
            state: RwLock::new(ConnectionState::Disconnected),
            outbound: Mutex::new(None),
            pending_acks: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashSet::new()),
            connect_lock: tokio::sync::Mutex::new(()),
            handler: RwLock::new(None),
            reader_task: Mutex::new(None),
            generation: AtomicU64::new(0),
        }))
    }

    /// Route inbound traffic to `handler`.
    pub fn set_handler(&self, handler: Weak<dyn RelayHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn handler(&self) -> Option<Arc<dyn RelayHandler>> {
        self.handler.read().as_ref().and_then(Weak::upgrade)
    }

    /// Normalized relay URL
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscription ids currently replicated to this relay
    pub fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `subscription_id` is currently replicated to this relay
    pub fn has_subscription(&self, subscription_id: &str) -> bool {
        self.subscriptions.lock().contains(subscription_id)
    }

    /// Number of messages still waiting for a terminal response
    pub fn pending_acks(&self) -> usize {
        self.pending_acks.lock().len()
    }

    /// Connect if not already connected.
    ///
    /// Concurrent callers share one attempt. A failed attempt is reported to
    /// the caller and not retried.
    pub async fn ensure_connect(self: &Arc<Self>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let attempt = self.generation.load(Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;
        info!("Connecting to relay: {}", self.url);

        let connection = match timeout(
            self.config.connect_timeout,
            self.transport.connect(&self.endpoint),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                self.connect_failed(attempt);
                warn!("Failed to connect to {}: {}", self.url, e);
                return Err(e);
            }
            Err(_) => {
                self.connect_failed(attempt);
                warn!("Connection to {} timed out", self.url);
                return Err(ClientError::Timeout(format!(
                    "connect to {} after {:?}",
                    self.url, self.config.connect_timeout
                )));
            }
        };

        // A disconnect() while connecting wins over the new connection.
        let generation = attempt + 1;
        if self
            .generation
            .compare_exchange(attempt, generation, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let Connection { mut sink, .. } = connection;
            let _ = sink.close("disconnected while connecting").await;
            return Err(ClientError::NotConnected);
        }

        self.start(connection, generation);
        info!("Connected to relay: {}", self.url);

        if let Some(handler) = self.handler() {
            handler.on_connect(self);
        }
        Ok(())
    }

    fn connect_failed(&self, attempt: u64) {
        if self.generation.load(Ordering::SeqCst) == attempt {
            *self.state.write() = ConnectionState::Disconnected;
        }
    }

    fn start(self: &Arc<Self>, connection: Connection, generation: u64) {
        let Connection { sink, mut events } = connection;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(tx);
        *self.state.write() = ConnectionState::Connected;

        tokio::spawn(run_writer(sink, rx, Arc::downgrade(self), generation));

        let relay = Arc::downgrade(self);
        let reader = tokio::spawn(async move {
            let reason = loop {
                let Some(event) = events.recv().await else {
                    break "connection closed".to_string();
                };
                let Some(strong) = relay.upgrade() else {
                    return;
                };
                match event {
                    TransportEvent::Message(text) => strong.on_message(&text),
                    TransportEvent::ClosedByServer(reason) => break reason,
                    TransportEvent::Error(e) => break e,
                }
            };
            if let Some(relay) = relay.upgrade() {
                relay.connection_lost(generation, &reason);
            }
        });

        if let Some(previous) = self.reader_task.lock().replace(reader) {
            previous.abort();
        }
    }

    /// Queue a message and return a handle resolved by its terminal response.
    ///
    /// EVENT and AUTH resolve on the matching `OK`; REQ resolves on `EOSE`
    /// (accepted) or `CLOSED` (rejected). CLOSE has no terminal response and
    /// resolves once queued. Unanswered acks fail after `ack_timeout`.
    pub fn send(self: &Arc<Self>, message: &ClientMessage) -> Result<PendingAck> {
        let json = message.to_json()?;
        let outbound = self
            .outbound
            .lock()
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let key = message.ack_key();
        let pending = match &key {
            Some(key) => self.track_ack(key.clone()),
            None => PendingAck::accepted(
                self.url.clone(),
                AckKey::Subscription(message.subscription_id().unwrap_or_default().to_string()),
            ),
        };

        if outbound.send(Outbound::Frame(json)).is_err() {
            if let Some(key) = &key {
                self.fail_ack(key, "connection closed");
            }
            return Err(ClientError::NotConnected);
        }

        debug!("Sent {} to {}", message.kind(), self.url);
        Ok(pending)
    }

    fn track_ack(self: &Arc<Self>, key: AckKey) -> PendingAck {
        let (ack, pending) = MessageAck::new(self.url.clone(), key.clone());

        let previous = self.pending_acks.lock().insert(key, Arc::clone(&ack));
        if let Some(previous) = previous {
            previous.resolve(false, "superseded by a newer request");
        }

        let relay = Arc::downgrade(self);
        let ack_timeout = self.config.ack_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(ack_timeout).await;
            if ack.expire(ack_timeout) {
                debug!("Ack for {} timed out", ack.message_id());
                if let Some(relay) = relay.upgrade() {
                    relay.remove_ack(&ack);
                }
            }
        });

        pending
    }

    fn remove_ack(&self, ack: &Arc<MessageAck>) {
        let mut acks = self.pending_acks.lock();
        if acks.get(ack.key()).is_some_and(|current| Arc::ptr_eq(current, ack)) {
            acks.remove(ack.key());
        }
    }

    fn resolve_ack(&self, key: &AckKey, success: bool, message: &str) -> bool {
        let ack = self.pending_acks.lock().remove(key);
        match ack {
            Some(ack) => ack.resolve(success, message),
            None => false,
        }
    }

    fn fail_ack(&self, key: &AckKey, message: &str) {
        self.resolve_ack(key, false, message);
    }

    /// Mark a subscription as replicated here. Returns `false` if it already was.
    pub(crate) fn track_subscription(&self, subscription_id: &str) -> bool {
        self.subscriptions.lock().insert(subscription_id.to_string())
    }

    /// Forget a subscription. Returns `false` if it was not replicated here.
    pub(crate) fn untrack_subscription(&self, subscription_id: &str) -> bool {
        self.subscriptions.lock().remove(subscription_id)
    }

    /// Parse one inbound frame and dispatch it by type.
    ///
    /// Malformed frames are logged and dropped.
    pub fn on_message(self: &Arc<Self>, text: &str) {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed frame from {}: {}", self.url, e);
                return;
            }
        };

        let handler = self.handler();

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if !self.has_subscription(&subscription_id) {
                    debug!(
                        "Ignoring event {} for unknown subscription {} from {}",
                        event.id, subscription_id, self.url
                    );
                    return;
                }
                if let Some(handler) = handler {
                    handler.on_event(self, &subscription_id, event);
                }
            }
            RelayMessage::Eose { subscription_id } => {
                self.resolve_ack(&AckKey::Subscription(subscription_id.clone()), true, "");
                if !self.has_subscription(&subscription_id) {
                    return;
                }
                if let Some(handler) = handler {
                    handler.on_eose(self, &subscription_id);
                }
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                if !success {
                    warn!("Relay {} rejected event {}: {}", self.url, event_id, message);
                }
                if !self.resolve_ack(&AckKey::Event(event_id.clone()), success, &message) {
                    debug!("OK for untracked event {} from {}", event_id, self.url);
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                self.fail_ack(&AckKey::Subscription(subscription_id.clone()), &message);
                if !self.untrack_subscription(&subscription_id) {
                    return;
                }
                if let Some(handler) = handler {
                    handler.on_closed(self, &subscription_id, &message);
                }
            }
            RelayMessage::Notice { message } => {
                info!("NOTICE from {}: {}", self.url, message);
                if let Some(handler) = handler {
                    handler.on_notice(self, &message);
                }
            }
            RelayMessage::Auth { challenge } => {
                debug!("AUTH challenge from {}", self.url);
                if let Some(handler) = handler {
                    handler.on_auth(self, &challenge);
                }
            }
        }
    }

    fn connection_lost(self: &Arc<Self>, generation: u64, reason: &str) {
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Ignoring stale close for {}", self.url);
            return;
        }

        self.outbound.lock().take();
        *self.state.write() = ConnectionState::Disconnected;
        self.reset(reason);
        warn!("Relay {} disconnected: {}", self.url, reason);

        if let Some(handler) = self.handler() {
            handler.on_disconnect(self, reason);
        }
    }

    /// Close the connection from the client side.
    ///
    /// Outstanding acks fail with `reason` and the replicated subscription
    /// ids are forgotten. The handler is not notified.
    pub fn disconnect(&self, reason: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(outbound) = self.outbound.lock().take() {
            let _ = outbound.send(Outbound::Close(reason.to_string()));
            info!("Disconnecting from relay {}: {}", self.url, reason);
        }
        if let Some(reader) = self.reader_task.lock().take() {
            reader.abort();
        }

        *self.state.write() = ConnectionState::Disconnected;
        self.reset(reason);
    }

    fn reset(&self, reason: &str) {
        let acks: Vec<Arc<MessageAck>> = self.pending_acks.lock().drain().map(|(_, a)| a).collect();
        for ack in acks {
            ack.resolve(false, reason);
        }
        self.subscriptions.lock().clear();
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

async fn run_writer(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    relay: Weak<Relay>,
    generation: u64,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(text) => {
                if let Err(e) = sink.send(text).await {
                    if let Some(relay) = relay.upgrade() {
                        warn!("Send to {} failed: {}", relay.url, e);
                        relay.connection_lost(generation, &e.to_string());
                    }
                    return;
                }
            }
            Outbound::Close(reason) => {
                if let Err(e) = sink.close(&reason).await {
                    debug!("Close handshake failed: {}", e);
                }
                return;
            }
        }
    }
}
