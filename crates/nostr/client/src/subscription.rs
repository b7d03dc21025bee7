//! Subscriptions replicated across the relays of a pool.
//!
//! A [`Subscription`] is one standing query sent to every relay it is
//! served by. It deduplicates events by id, tracks EOSE per relay and fans
//! out to its listeners. All of its mutable state sits behind one lock of
//! its own; listeners are always invoked with that lock released.
//!
//! Lifecycle: `Created` → `Open` (on [`Subscription::open`]) → `Closed` (on
//! [`Subscription::close`] or once every serving relay sent `CLOSED`).

use crate::error::{ClientError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::message::ClientMessage;
use crate::pool::PoolInner;
use crate::relay::Relay;
use crate::store::EventStore;
use nostr::{Event, Filter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Generate a subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Subscription lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Created,
    Open,
    Closed,
}

/// What a subscription delivered, in the order its listeners saw it.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// A new event; `stored` is true if it arrived before that relay's EOSE
    Event { event: Arc<Event>, stored: bool },
    /// One relay reached EOSE; `everywhere` is true once all serving relays have
    Eose { relay_url: String, everywhere: bool },
    /// The subscription closed
    Closed { reasons: Vec<String> },
}

type EventListener = dyn Fn(&Subscription, &Arc<Event>, bool) + Send + Sync;
type EoseListener = dyn Fn(&Subscription, &str, bool) + Send + Sync;
type CloseListener = dyn Fn(&Subscription, &[String]) + Send + Sync;
type OpenListener = dyn Fn(&Subscription) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    EoseEverywhere,
    Closed,
}

struct ServingRelay {
    relay: Arc<Relay>,
    eose: bool,
}

struct SubscriptionState {
    status: SubscriptionStatus,
    /// Serving relays by normalized URL
    relays: HashMap<String, ServingRelay>,
    seen: HashSet<String>,
    close_reasons: Vec<String>,
    /// Set when removals emptied the serving set; nothing is left to wait for
    drained: bool,
}

impl SubscriptionState {
    fn eose_everywhere(&self) -> bool {
        if self.relays.is_empty() {
            return self.drained;
        }
        self.relays.values().all(|r| r.eose)
    }

    fn progress(&self) -> Progress {
        match self.status {
            SubscriptionStatus::Closed => Progress::Closed,
            _ if self.eose_everywhere() => Progress::EoseEverywhere,
            _ => Progress::Pending,
        }
    }

    fn add_reason(&mut self, reason: String) {
        if !reason.is_empty() && !self.close_reasons.contains(&reason) {
            self.close_reasons.push(reason);
        }
    }
}

/// A standing query replicated across relays
pub struct Subscription {
    id: String,
    filters: Vec<Filter>,
    created_at: Instant,
    pool: Weak<PoolInner>,
    store: Option<Arc<EventStore>>,
    state: Mutex<SubscriptionState>,
    progress: watch::Sender<Progress>,
    event_listeners: Listeners<EventListener>,
    eose_listeners: Listeners<EoseListener>,
    close_listeners: Listeners<CloseListener>,
    open_listeners: Listeners<OpenListener>,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        filters: Vec<Filter>,
        pool: Weak<PoolInner>,
        store: Option<Arc<EventStore>>,
    ) -> Self {
        let (progress, _) = watch::channel(Progress::Pending);
        Self {
            id,
            filters,
            created_at: Instant::now(),
            pool,
            store,
            state: Mutex::new(SubscriptionState {
                status: SubscriptionStatus::Created,
                relays: HashMap::new(),
                seen: HashSet::new(),
                close_reasons: Vec::new(),
                drained: false,
            }),
            progress,
            event_listeners: Listeners::new(),
            eose_listeners: Listeners::new(),
            close_listeners: Listeners::new(),
            open_listeners: Listeners::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.state.lock().status
    }

    pub fn is_open(&self) -> bool {
        self.status() == SubscriptionStatus::Open
    }

    /// URLs of the relays currently serving this subscription
    pub fn relay_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.state.lock().relays.keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Whether every serving relay has sent EOSE
    pub fn is_eose_everywhere(&self) -> bool {
        self.state.lock().eose_everywhere()
    }

    /// Number of distinct events delivered so far
    pub fn seen_count(&self) -> usize {
        self.state.lock().seen.len()
    }

    /// Reasons recorded so far: the local close reason and relay CLOSED messages
    pub fn close_reasons(&self) -> Vec<String> {
        self.state.lock().close_reasons.clone()
    }

    /// Register a listener for new events: `(subscription, event, stored)`.
    pub fn add_event_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Subscription, &Arc<Event>, bool) + Send + Sync + 'static,
    {
        self.event_listeners.add(Arc::new(listener))
    }

    /// Register a listener for per-relay EOSE: `(subscription, relay_url, everywhere)`.
    pub fn add_eose_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Subscription, &str, bool) + Send + Sync + 'static,
    {
        self.eose_listeners.add(Arc::new(listener))
    }

    /// Register a listener fired once when the subscription closes.
    pub fn add_close_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Subscription, &[String]) + Send + Sync + 'static,
    {
        self.close_listeners.add(Arc::new(listener))
    }

    /// Register a listener fired when the subscription opens.
    pub fn add_open_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Subscription) + Send + Sync + 'static,
    {
        self.open_listeners.add(Arc::new(listener))
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.event_listeners.remove(id)
    }

    pub fn remove_eose_listener(&self, id: ListenerId) -> bool {
        self.eose_listeners.remove(id)
    }

    pub fn remove_close_listener(&self, id: ListenerId) -> bool {
        self.close_listeners.remove(id)
    }

    pub fn remove_open_listener(&self, id: ListenerId) -> bool {
        self.open_listeners.remove(id)
    }

    /// Total number of registered listeners of all kinds
    pub fn listener_count(&self) -> usize {
        self.event_listeners.len()
            + self.eose_listeners.len()
            + self.close_listeners.len()
            + self.open_listeners.len()
    }

    /// Receive this subscription's events, EOSE signals and close as a channel.
    ///
    /// Register before [`open`](Self::open) to see every event.
    pub fn stream(&self) -> mpsc::UnboundedReceiver<SubscriptionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        let events = tx.clone();
        self.add_event_listener(move |_, event, stored| {
            let _ = events.send(SubscriptionEvent::Event {
                event: Arc::clone(event),
                stored,
            });
        });
        let eose = tx.clone();
        self.add_eose_listener(move |_, relay_url, everywhere| {
            let _ = eose.send(SubscriptionEvent::Eose {
                relay_url: relay_url.to_string(),
                everywhere,
            });
        });

        let state = self.state.lock();
        if state.status == SubscriptionStatus::Closed {
            let _ = tx.send(SubscriptionEvent::Closed {
                reasons: state.close_reasons.clone(),
            });
        } else {
            self.add_close_listener(move |_, reasons| {
                let _ = tx.send(SubscriptionEvent::Closed {
                    reasons: reasons.to_vec(),
                });
            });
        }
        rx
    }

    /// Wait until every serving relay has sent EOSE.
    ///
    /// Returns `false` if the subscription closed first.
    pub async fn wait_for_eose(&self) -> bool {
        let mut rx = self.progress.subscribe();
        match rx.wait_for(|p| *p != Progress::Pending).await {
            Ok(progress) => *progress == Progress::EoseEverywhere,
            Err(_) => false,
        }
    }

    fn publish_progress(&self, state: &SubscriptionState) {
        self.progress.send_replace(state.progress());
    }

    /// Send REQ to every relay of the pool and start delivering events.
    ///
    /// Opening an open subscription is a no-op; opening a closed one fails.
    pub fn open(&self) -> Result<()> {
        let relays = {
            let mut state = self.state.lock();
            match state.status {
                SubscriptionStatus::Open => return Ok(()),
                SubscriptionStatus::Closed => {
                    return Err(ClientError::SubscriptionClosed(self.id.clone()));
                }
                SubscriptionStatus::Created => {}
            }

            let pool = self.pool.upgrade().ok_or(ClientError::PoolClosed)?;
            let relays = pool.relay_snapshot();
            state.status = SubscriptionStatus::Open;
            for relay in &relays {
                state.relays.insert(
                    relay.url().to_string(),
                    ServingRelay {
                        relay: Arc::clone(relay),
                        eose: false,
                    },
                );
            }
            self.publish_progress(&state);
            relays
        };

        info!("Opening subscription {} on {} relays", self.id, relays.len());
        for relay in &relays {
            self.send_req(relay);
        }
        for listener in self.open_listeners.snapshot() {
            listener(self);
        }
        Ok(())
    }

    fn send_req(&self, relay: &Arc<Relay>) {
        if !relay.is_connected() || !relay.track_subscription(&self.id) {
            return;
        }
        let req = ClientMessage::Req {
            subscription_id: self.id.clone(),
            filters: self.filters.clone(),
        };
        if let Err(e) = relay.send(&req) {
            relay.untrack_subscription(&self.id);
            warn!("Failed to subscribe {} on {}: {}", self.id, relay.url(), e);
        }
    }

    /// Start serving this subscription from `relay`.
    ///
    /// Sends REQ if the relay is connected and does not already carry the
    /// subscription; a relay that gets a fresh REQ starts over without EOSE.
    pub fn add_relay(&self, relay: &Arc<Relay>) {
        {
            let mut state = self.state.lock();
            if state.status != SubscriptionStatus::Open {
                return;
            }
            let fresh = !relay.has_subscription(&self.id);
            let state = &mut *state;
            let entry = state
                .relays
                .entry(relay.url().to_string())
                .or_insert_with(|| ServingRelay {
                    relay: Arc::clone(relay),
                    eose: false,
                });
            state.drained = false;
            if fresh {
                entry.relay = Arc::clone(relay);
                entry.eose = false;
            }
            self.publish_progress(&state);
        }
        self.send_req(relay);
    }

    /// Stop serving this subscription from `relay`, sending CLOSE to it only.
    pub fn remove_relay(&self, relay: &Arc<Relay>) {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.relays.remove(relay.url()).is_some();
            if removed {
                if state.status == SubscriptionStatus::Open && state.relays.is_empty() {
                    state.drained = true;
                }
                self.publish_progress(&state);
            }
            removed
        };
        if removed {
            debug!("Subscription {} dropped relay {}", self.id, relay.url());
            send_close(relay, &self.id);
        }
    }

    pub(crate) fn handle_event(&self, relay: &Relay, event: Event) {
        let stored = {
            let mut state = self.state.lock();
            if state.status != SubscriptionStatus::Open {
                return;
            }
            let Some(serving) = state.relays.get(relay.url()) else {
                return;
            };
            let stored = !serving.eose;
            if state.seen.contains(&event.id) {
                return;
            }
            if !Filter::matches_any(&self.filters, &event) {
                debug!(
                    "Relay {} sent event {} not matching subscription {}",
                    relay.url(),
                    event.id,
                    self.id
                );
                return;
            }
            state.seen.insert(event.id.clone());
            stored
        };

        let event = Arc::new(event);
        if let Some(store) = &self.store {
            store.add_event(&event);
        }
        for listener in self.event_listeners.snapshot() {
            listener(self, &event, stored);
        }
    }

    pub(crate) fn handle_eose(&self, relay: &Relay) {
        let everywhere = {
            let mut state = self.state.lock();
            if state.status != SubscriptionStatus::Open {
                return;
            }
            let Some(serving) = state.relays.get_mut(relay.url()) else {
                return;
            };
            if serving.eose {
                return;
            }
            serving.eose = true;
            self.publish_progress(&state);
            state.eose_everywhere()
        };

        debug!(
            "EOSE for {} from {} (everywhere: {})",
            self.id,
            relay.url(),
            everywhere
        );
        for listener in self.eose_listeners.snapshot() {
            listener(self, relay.url(), everywhere);
        }
    }

    pub(crate) fn handle_closed(&self, relay: &Relay, message: &str) {
        let reasons = {
            let mut state = self.state.lock();
            if state.status != SubscriptionStatus::Open {
                return;
            }
            if state.relays.remove(relay.url()).is_none() {
                return;
            }
            state.add_reason(message.to_string());
            if state.relays.is_empty() {
                state.status = SubscriptionStatus::Closed;
                Some(state.close_reasons.clone())
            } else {
                self.publish_progress(&state);
                None
            }
        };

        warn!(
            "Relay {} closed subscription {}: {}",
            relay.url(),
            self.id,
            message
        );
        if let Some(reasons) = reasons {
            self.finish_close(reasons);
        }
    }

    /// Send CLOSE to every serving relay and fire close listeners once.
    ///
    /// Closing an already closed subscription does nothing.
    pub fn close(&self) {
        self.close_with(None);
    }

    /// Like [`close`](Self::close), recording `reason` first among the close reasons.
    pub fn close_with_reason(&self, reason: impl Into<String>) {
        self.close_with(Some(reason.into()));
    }

    fn close_with(&self, reason: Option<String>) {
        let (relays, reasons) = {
            let mut state = self.state.lock();
            if state.status == SubscriptionStatus::Closed {
                return;
            }
            state.status = SubscriptionStatus::Closed;
            if let Some(reason) = reason.filter(|r| !r.is_empty())
                && !state.close_reasons.contains(&reason)
            {
                state.close_reasons.insert(0, reason);
            }
            let relays: Vec<Arc<Relay>> = state.relays.drain().map(|(_, s)| s.relay).collect();
            (relays, state.close_reasons.clone())
        };

        for relay in &relays {
            send_close(relay, &self.id);
        }
        self.finish_close(reasons);
    }

    fn finish_close(&self, reasons: Vec<String>) {
        self.progress.send_replace(Progress::Closed);
        if let Some(pool) = self.pool.upgrade() {
            pool.forget_subscription(&self.id);
        }
        info!("Closed subscription {}", self.id);
        for listener in self.close_listeners.snapshot() {
            listener(self, &reasons);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filters", &self.filters)
            .field("status", &self.status())
            .finish()
    }
}

/// CLOSE `subscription_id` on `relay` if the relay still carries it.
fn send_close(relay: &Arc<Relay>, subscription_id: &str) {
    if !relay.untrack_subscription(subscription_id) {
        return;
    }
    let close = ClientMessage::Close {
        subscription_id: subscription_id.to_string(),
    };
    if let Err(e) = relay.send(&close) {
        debug!("CLOSE {} on {} not sent: {}", subscription_id, relay.url(), e);
    }
}
