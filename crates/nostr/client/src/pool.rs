//! Relay pool for managing connections to multiple Nostr relays.
//!
//! The pool owns the set of [`Relay`]s and the set of [`Subscription`]s. It
//! fans operations out to relays, routes inbound frames to the subscription
//! they belong to, aggregates per-relay publish acks under a
//! [`PublishPolicy`] and reconnects dropped relays through a
//! [`ReconnectPolicy`].

use crate::error::{ClientError, Result};
use crate::message::ClientMessage;
use crate::reconnect::{ExponentialBackoff, ReconnectConfig, ReconnectPolicy};
use crate::relay::{ConnectionState, Relay, RelayConfig, RelayHandler, normalize_relay_url};
use crate::store::{EventStore, EventStoreConfig};
use crate::subscription::{Subscription, generate_subscription_id};
use crate::transport::{Transport, WebSocketTransport};
use async_trait::async_trait;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use nostr::{Event, Filter, sort_events};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Settings applied to every relay the pool creates
    pub relay: RelayConfig,
    /// Settings for the default reconnect policy
    pub reconnect: ReconnectConfig,
    pub store: EventStoreConfig,
    /// Upper bound on how long `publish` waits for acks
    pub publish_timeout: Duration,
    /// Default deadline for `fetch`
    pub fetch_timeout: Duration,
    /// Capacity of the notification broadcast channel
    pub notification_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            reconnect: ReconnectConfig::default(),
            store: EventStoreConfig::default(),
            publish_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            notification_capacity: 1024,
        }
    }
}

/// Events emitted by the relay pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A relay connected
    Connected { relay_url: String },
    /// A relay disconnected without the client asking for it
    Disconnected { relay_url: String, reason: String },
    /// Notice from a relay
    Notice { relay_url: String, message: String },
    /// NIP-42 authentication challenge from a relay
    Auth { relay_url: String, challenge: String },
    /// Connection or authentication error
    Error { relay_url: String, error: String },
}

/// How many relay acceptances a publish needs to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishPolicy {
    /// At least one relay accepted
    #[default]
    Any,
    /// Every targeted relay accepted
    All,
    /// At least `n` relays accepted
    AtLeast(usize),
}

impl PublishPolicy {
    /// Acceptances required out of `total` targeted relays
    pub fn required(&self, total: usize) -> usize {
        match self {
            PublishPolicy::Any => 1,
            PublishPolicy::All => total,
            PublishPolicy::AtLeast(n) => *n,
        }
    }
}

/// One relay's answer to a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    /// OK true, with the relay's message
    Accepted(String),
    /// OK false, with the relay's reason
    Rejected(String),
    /// Not sent, connection lost, or no answer in time
    Failed(String),
    /// Still outstanding when the aggregate result was decided
    Pending,
}

/// Per-relay results of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub event_id: String,
    pub statuses: HashMap<String, RelayStatus>,
}

impl PublishOutcome {
    pub fn accepted_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| matches!(s, RelayStatus::Accepted(_)))
            .count()
    }

    /// URLs of the relays that accepted the event
    pub fn accepted(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self
            .statuses
            .iter()
            .filter(|(_, s)| matches!(s, RelayStatus::Accepted(_)))
            .map(|(url, _)| url.as_str())
            .collect();
        urls.sort();
        urls
    }

    /// `(url, reason)` for every relay that rejected or failed
    pub fn failures(&self) -> Vec<(&str, &str)> {
        let mut failures: Vec<(&str, &str)> = self
            .statuses
            .iter()
            .filter_map(|(url, status)| match status {
                RelayStatus::Rejected(reason) | RelayStatus::Failed(reason) => {
                    Some((url.as_str(), reason.as_str()))
                }
                _ => None,
            })
            .collect();
        failures.sort();
        failures
    }

    pub fn status(&self, relay_url: &str) -> Option<&RelayStatus> {
        self.statuses.get(relay_url)
    }
}

/// Result of [`RelayPool::fetch`].
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Deduplicated events, newest first
    pub events: Vec<Arc<Event>>,
    /// Whether every relay sent EOSE before the deadline
    pub complete: bool,
}

/// Signs NIP-42 authentication events in answer to relay challenges.
#[async_trait]
pub trait AuthSigner: Send + Sync + 'static {
    /// Build and sign a kind 22242 event for `challenge` from `relay_url`.
    async fn sign_auth(&self, relay_url: &str, challenge: &str) -> Result<Event>;
}

pub(crate) struct PoolInner {
    this: Weak<PoolInner>,
    config: PoolConfig,
    transport: Arc<dyn Transport>,
    reconnect: Arc<dyn ReconnectPolicy>,
    signer: Option<Arc<dyn AuthSigner>>,
    relays: RwLock<HashMap<String, Arc<Relay>>>,
    subscriptions: RwLock<HashMap<String, Arc<Subscription>>>,
    store: Arc<EventStore>,
    events_tx: broadcast::Sender<PoolEvent>,
    closed: AtomicBool,
}

impl PoolInner {
    pub(crate) fn relay_snapshot(&self) -> Vec<Arc<Relay>> {
        let mut relays: Vec<Arc<Relay>> = self.relays.read().values().cloned().collect();
        relays.sort_by(|a, b| a.url().cmp(b.url()));
        relays
    }

    pub(crate) fn forget_subscription(&self, subscription_id: &str) {
        self.subscriptions.write().remove(subscription_id);
    }

    fn subscription(&self, subscription_id: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.read().get(subscription_id).cloned()
    }

    fn open_subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .values()
            .filter(|s| s.is_open())
            .cloned()
            .collect()
    }

    fn is_member(&self, relay: &Arc<Relay>) -> bool {
        self.relays
            .read()
            .get(relay.url())
            .is_some_and(|current| Arc::ptr_eq(current, relay))
    }

    fn notify(&self, event: PoolEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }

    fn add_relay(&self, url: &str) -> Result<Arc<Relay>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::PoolClosed);
        }
        let key = normalize_relay_url(url)?;

        let mut relays = self.relays.write();
        if let Some(existing) = relays.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let relay = Relay::new(&key, self.config.relay.clone(), Arc::clone(&self.transport))?;
        let handler: Weak<dyn RelayHandler> = self.this.clone();
        relay.set_handler(handler);
        relays.insert(key.clone(), Arc::clone(&relay));
        info!("Added relay to pool: {}", key);
        Ok(relay)
    }

    async fn connect_relay(&self, relay: &Arc<Relay>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::PoolClosed);
        }
        if let Err(e) = relay.ensure_connect().await {
            self.notify(PoolEvent::Error {
                relay_url: relay.url().to_string(),
                error: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }

    fn schedule_reconnect(&self, relay: Arc<Relay>) {
        let pool = self.this.clone();
        let policy = Arc::clone(&self.reconnect);

        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let Some(delay) = policy.next_delay(attempt) else {
                    warn!(
                        "Giving up on {} after {} reconnect attempts",
                        relay.url(),
                        attempt - 1
                    );
                    if let Some(pool) = pool.upgrade() {
                        pool.notify(PoolEvent::Error {
                            relay_url: relay.url().to_string(),
                            error: "reconnect attempts exhausted".to_string(),
                        });
                    }
                    return;
                };

                debug!("Reconnecting to {} in {:?} (attempt {})", relay.url(), delay, attempt);
                tokio::time::sleep(delay).await;

                let Some(inner) = pool.upgrade() else {
                    return;
                };
                if inner.closed.load(Ordering::SeqCst) || !inner.is_member(&relay) {
                    return;
                }
                if relay.is_connected() {
                    return;
                }
                match relay.ensure_connect().await {
                    Ok(()) => {
                        info!("Reconnected to {}", relay.url());
                        return;
                    }
                    Err(e) => warn!("Reconnect to {} failed: {}", relay.url(), e),
                }
            }
        });
    }

    fn answer_auth(&self, relay: &Arc<Relay>, challenge: &str) {
        let Some(signer) = self.signer.clone() else {
            return;
        };
        let pool = self.this.clone();
        let relay = Arc::clone(relay);
        let challenge = challenge.to_string();

        tokio::spawn(async move {
            let result = async {
                let event = signer
                    .sign_auth(relay.url(), &challenge)
                    .await
                    .map_err(|e| match e {
                        ClientError::Signer(message) => ClientError::Signer(message),
                        other => ClientError::Signer(other.to_string()),
                    })?;
                relay.send(&ClientMessage::Auth(event))?.get().await
            }
            .await;

            match result {
                Ok(_) => info!("Authenticated with {}", relay.url()),
                Err(e) => {
                    warn!("Authentication with {} failed: {}", relay.url(), e);
                    if let Some(pool) = pool.upgrade() {
                        pool.notify(PoolEvent::Error {
                            relay_url: relay.url().to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        });
    }
}

impl RelayHandler for PoolInner {
    fn on_connect(&self, relay: &Arc<Relay>) {
        self.notify(PoolEvent::Connected {
            relay_url: relay.url().to_string(),
        });
        if self.closed.load(Ordering::SeqCst) || !self.is_member(relay) {
            return;
        }
        for subscription in self.open_subscriptions() {
            subscription.add_relay(relay);
        }
    }

    fn on_event(&self, relay: &Arc<Relay>, subscription_id: &str, event: Event) {
        match self.subscription(subscription_id) {
            Some(subscription) => subscription.handle_event(relay, event),
            None => debug!(
                "Event {} for unknown subscription {} from {}",
                event.id,
                subscription_id,
                relay.url()
            ),
        }
    }

    fn on_eose(&self, relay: &Arc<Relay>, subscription_id: &str) {
        if let Some(subscription) = self.subscription(subscription_id) {
            subscription.handle_eose(relay);
        }
    }

    fn on_closed(&self, relay: &Arc<Relay>, subscription_id: &str, message: &str) {
        if let Some(subscription) = self.subscription(subscription_id) {
            subscription.handle_closed(relay, message);
        }
    }

    fn on_notice(&self, relay: &Arc<Relay>, message: &str) {
        self.notify(PoolEvent::Notice {
            relay_url: relay.url().to_string(),
            message: message.to_string(),
        });
    }

    fn on_auth(&self, relay: &Arc<Relay>, challenge: &str) {
        self.notify(PoolEvent::Auth {
            relay_url: relay.url().to_string(),
            challenge: challenge.to_string(),
        });
        self.answer_auth(relay, challenge);
    }

    fn on_disconnect(&self, relay: &Arc<Relay>, reason: &str) {
        self.notify(PoolEvent::Disconnected {
            relay_url: relay.url().to_string(),
            reason: reason.to_string(),
        });
        if self.closed.load(Ordering::SeqCst) || !self.is_member(relay) {
            return;
        }
        self.schedule_reconnect(Arc::clone(relay));
    }
}

/// Builder for a [`RelayPool`] with injected collaborators.
pub struct RelayPoolBuilder {
    config: PoolConfig,
    transport: Option<Arc<dyn Transport>>,
    reconnect: Option<Arc<dyn ReconnectPolicy>>,
    signer: Option<Arc<dyn AuthSigner>>,
}

impl RelayPoolBuilder {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Frame transport (defaults to [`WebSocketTransport`])
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Reconnect policy (defaults to [`ExponentialBackoff`] over `config.reconnect`)
    pub fn reconnect_policy(mut self, policy: impl ReconnectPolicy) -> Self {
        self.reconnect = Some(Arc::new(policy));
        self
    }

    /// Answer NIP-42 challenges with `signer`
    pub fn signer(mut self, signer: impl AuthSigner) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    pub fn build(self) -> RelayPool {
        let Self {
            config,
            transport,
            reconnect,
            signer,
        } = self;
        let transport = transport.unwrap_or_else(|| Arc::new(WebSocketTransport::new()));
        let reconnect = reconnect
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::new(config.reconnect.clone())));
        let (events_tx, _) = broadcast::channel(config.notification_capacity.max(1));
        let store = Arc::new(EventStore::with_config(config.store.clone()));

        let inner = Arc::new_cyclic(|this| PoolInner {
            this: this.clone(),
            config,
            transport,
            reconnect,
            signer,
            relays: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            store,
            events_tx,
            closed: AtomicBool::new(false),
        });
        RelayPool { inner }
    }
}

/// A pool of Nostr relay connections.
#[derive(Clone)]
pub struct RelayPool {
    inner: Arc<PoolInner>,
}

impl RelayPool {
    /// Create a new relay pool.
    pub fn new(config: PoolConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> RelayPoolBuilder {
        RelayPoolBuilder {
            config: PoolConfig::default(),
            transport: None,
            reconnect: None,
            signer: None,
        }
    }

    /// Create a pool with `relays` added but not yet connected.
    pub fn with_relays<I, S>(relays: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pool = Self::default();
        for url in relays {
            pool.add_relay(url.as_ref())?;
        }
        Ok(pool)
    }

    /// Subscribe to pool notifications.
    pub fn notifications(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Shared store every subscription records into
    pub fn store(&self) -> Arc<EventStore> {
        Arc::clone(&self.inner.store)
    }

    /// Add a relay without connecting it. Returns the existing relay if the
    /// normalized URL is already in the pool.
    pub fn add_relay(&self, url: &str) -> Result<Arc<Relay>> {
        self.inner.add_relay(url)
    }

    /// Connect a relay of this pool. Open subscriptions are sent to it once
    /// the connection is up.
    pub async fn connect_relay(&self, relay: &Arc<Relay>) -> Result<()> {
        self.inner.connect_relay(relay).await
    }

    /// Add (if absent) and connect a relay.
    pub async fn ensure_relay(&self, url: &str) -> Result<Arc<Relay>> {
        let relay = self.inner.add_relay(url)?;
        self.inner.connect_relay(&relay).await?;
        Ok(relay)
    }

    /// Connect every relay in the pool concurrently.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let relays = self.inner.relay_snapshot();
        let attempts = relays.iter().map(|relay| async move {
            let result = self.inner.connect_relay(relay).await;
            (relay.url().to_string(), result)
        });
        join_all(attempts).await
    }

    /// Remove a relay: every subscription drops it, then it is disconnected.
    ///
    /// Returns `false` if the relay was not in the pool.
    pub fn remove_relay(&self, url: &str) -> Result<bool> {
        let key = normalize_relay_url(url)?;
        let Some(relay) = self.inner.relays.write().remove(&key) else {
            return Ok(false);
        };

        info!("Removing relay from pool: {}", key);
        let subscriptions: Vec<Arc<Subscription>> =
            self.inner.subscriptions.read().values().cloned().collect();
        for subscription in subscriptions {
            subscription.remove_relay(&relay);
        }
        relay.disconnect("removed from pool");
        Ok(true)
    }

    pub fn relay(&self, url: &str) -> Option<Arc<Relay>> {
        let key = normalize_relay_url(url).ok()?;
        self.inner.relays.read().get(&key).cloned()
    }

    /// Normalized URLs of all relays in the pool
    pub fn relay_urls(&self) -> Vec<String> {
        self.inner
            .relay_snapshot()
            .iter()
            .map(|r| r.url().to_string())
            .collect()
    }

    pub fn states(&self) -> HashMap<String, ConnectionState> {
        self.inner
            .relays
            .read()
            .iter()
            .map(|(url, relay)| (url.clone(), relay.state()))
            .collect()
    }

    pub fn is_connected(&self, url: &str) -> bool {
        self.relay(url).is_some_and(|r| r.is_connected())
    }

    /// Get the number of connected relays.
    pub fn connected_count(&self) -> usize {
        self.inner
            .relays
            .read()
            .values()
            .filter(|r| r.is_connected())
            .count()
    }

    /// Create a subscription with a fresh id. It is not opened.
    pub fn subscribe(&self, filters: Vec<Filter>) -> Result<Arc<Subscription>> {
        loop {
            match self.subscribe_with_id(generate_subscription_id(), filters.clone()) {
                Err(ClientError::DuplicateSubscription(_)) => continue,
                other => return other,
            }
        }
    }

    /// Create a subscription with a caller-chosen id. It is not opened.
    pub fn subscribe_with_id(
        &self,
        subscription_id: impl Into<String>,
        filters: Vec<Filter>,
    ) -> Result<Arc<Subscription>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::PoolClosed);
        }
        let subscription_id = subscription_id.into();

        let mut subscriptions = self.inner.subscriptions.write();
        if subscriptions.contains_key(&subscription_id) {
            return Err(ClientError::DuplicateSubscription(subscription_id));
        }

        info!(
            "Creating subscription {} with {} filters",
            subscription_id,
            filters.len()
        );
        let subscription = Arc::new(Subscription::new(
            subscription_id.clone(),
            filters,
            self.inner.this.clone(),
            Some(Arc::clone(&self.inner.store)),
        ));
        subscriptions.insert(subscription_id, Arc::clone(&subscription));
        Ok(subscription)
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<Arc<Subscription>> {
        self.inner.subscription(subscription_id)
    }

    /// Ids of subscriptions registered and not yet closed
    pub fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.subscriptions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Collect events matching `filters` until every relay sent EOSE or the
    /// deadline (default `fetch_timeout`) passes, then close the subscription.
    ///
    /// Relays that never answer only shorten the result; they never make the
    /// call fail.
    pub async fn fetch(&self, filters: Vec<Filter>, timeout: Option<Duration>) -> Result<Fetched> {
        if self.inner.relays.read().is_empty() {
            return Ok(Fetched {
                events: Vec::new(),
                complete: true,
            });
        }

        let subscription = self.subscribe(filters)?;
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        subscription.add_event_listener(move |_, event, _| {
            sink.lock().push(Arc::clone(event));
        });
        subscription.open()?;

        let deadline = timeout.unwrap_or(self.inner.config.fetch_timeout);
        let complete = match tokio::time::timeout(deadline, subscription.wait_for_eose()).await {
            Ok(complete) => complete,
            Err(_) => {
                debug!(
                    "Fetch {} hit its {:?} deadline before EOSE everywhere",
                    subscription.id(),
                    deadline
                );
                false
            }
        };
        subscription.close_with_reason("fetch complete");

        let mut events = std::mem::take(&mut *collected.lock());
        sort_events(&mut events);
        Ok(Fetched { events, complete })
    }

    /// Publish to every relay in the pool.
    pub async fn publish(&self, event: Event, policy: PublishPolicy) -> Result<PublishOutcome> {
        let relays = self.inner.relay_snapshot();
        self.publish_on(event, relays, policy).await
    }

    /// Publish to the given relays of this pool only. URLs naming the same
    /// relay are sent to once.
    pub async fn publish_to(
        &self,
        event: Event,
        relay_urls: &[&str],
        policy: PublishPolicy,
    ) -> Result<PublishOutcome> {
        let mut relays: Vec<Arc<Relay>> = Vec::with_capacity(relay_urls.len());
        for url in relay_urls {
            let relay = self
                .relay(url)
                .ok_or_else(|| ClientError::InvalidUrl(format!("{} is not in the pool", url)))?;
            if !relays.iter().any(|r| Arc::ptr_eq(r, &relay)) {
                relays.push(relay);
            }
        }
        self.publish_on(event, relays, policy).await
    }

    async fn publish_on(
        &self,
        event: Event,
        relays: Vec<Arc<Relay>>,
        policy: PublishPolicy,
    ) -> Result<PublishOutcome> {
        if relays.is_empty() {
            return Err(ClientError::NoRelays);
        }

        let required = policy.required(relays.len());
        let message = ClientMessage::Event(event.clone());
        let mut statuses: HashMap<String, RelayStatus> = HashMap::new();
        let mut pending = FuturesUnordered::new();

        for relay in &relays {
            match relay.send(&message) {
                Ok(ack) => {
                    statuses.insert(relay.url().to_string(), RelayStatus::Pending);
                    pending.push(async move {
                        let url = ack.relay_url().to_string();
                        (url, ack.outcome().await)
                    });
                }
                Err(e) => {
                    warn!("Failed to publish {} to {}: {}", event.id, relay.url(), e);
                    statuses.insert(relay.url().to_string(), RelayStatus::Failed(e.to_string()));
                }
            }
        }

        let mut accepted = 0usize;
        let deadline = tokio::time::sleep(self.inner.config.publish_timeout);
        tokio::pin!(deadline);

        while accepted < required {
            tokio::select! {
                next = pending.next() => {
                    let Some((url, result)) = next else {
                        break;
                    };
                    let status = match result {
                        Ok(outcome) if outcome.accepted => {
                            accepted += 1;
                            RelayStatus::Accepted(outcome.message)
                        }
                        Ok(outcome) if outcome.timed_out => RelayStatus::Failed(outcome.message),
                        Ok(outcome) => RelayStatus::Rejected(outcome.message),
                        Err(e) => RelayStatus::Failed(e.to_string()),
                    };
                    statuses.insert(url, status);
                }
                _ = &mut deadline => {
                    debug!("Publish of {} hit its deadline", event.id);
                    break;
                }
            }
        }

        let outcome = PublishOutcome {
            event_id: event.id.clone(),
            statuses,
        };
        if accepted >= required {
            debug!(
                "Published {} to {}/{} relays",
                event.id,
                accepted,
                relays.len()
            );
            Ok(outcome)
        } else {
            warn!(
                "Publish of {} failed: {} of {} required relays accepted",
                event.id, accepted, required
            );
            Err(ClientError::PublishRejected {
                required,
                outcome: Box::new(outcome),
            })
        }
    }

    /// Close every subscription and disconnect every relay.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscriptions: Vec<Arc<Subscription>> =
            self.inner.subscriptions.read().values().cloned().collect();
        for subscription in subscriptions {
            subscription.close_with_reason("pool closed");
        }

        let relays: Vec<Arc<Relay>> = self.inner.relays.write().drain().map(|(_, r)| r).collect();
        for relay in &relays {
            relay.disconnect("pool closed");
        }
        info!("Relay pool closed ({} relays)", relays.len());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
