//! Outbound message acknowledgments.
//!
//! A [`MessageAck`] is recorded by a relay for every message that expects a
//! terminal response (`OK` for events, `EOSE`/`CLOSED` for subscriptions).
//! The waiting side holds the matching [`PendingAck`].
//!
//! Exactly one terminal callback fires per ack: the resolver is a oneshot
//! sender taken under the ack's lock, so a network response racing a timeout
//! resolves it once and the loser is a no-op.

use crate::error::{ClientError, Result};
use crate::message::AckKey;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Terminal result of an outbound message on one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    /// Relay that answered
    pub relay_url: String,
    /// Event id or subscription id
    pub message_id: String,
    /// Whether the relay accepted the message
    pub accepted: bool,
    /// Relay-supplied message (empty if none)
    pub message: String,
    /// Resolved by the local timeout rather than the relay
    pub timed_out: bool,
}

struct AckState {
    success: bool,
    message: String,
    timed_out: bool,
    resolver: Option<oneshot::Sender<AckOutcome>>,
}

/// One outbound message awaiting a relay's terminal response.
pub struct MessageAck {
    relay_url: String,
    key: AckKey,
    sent_at: Instant,
    state: Mutex<AckState>,
}

impl MessageAck {
    /// Create an ack and the future-side handle that observes it.
    pub fn new(relay_url: impl Into<String>, key: AckKey) -> (Arc<Self>, PendingAck) {
        let relay_url = relay_url.into();
        let (tx, rx) = oneshot::channel();
        let ack = Arc::new(Self {
            relay_url: relay_url.clone(),
            key: key.clone(),
            sent_at: Instant::now(),
            state: Mutex::new(AckState {
                success: false,
                message: String::new(),
                timed_out: false,
                resolver: Some(tx),
            }),
        });
        let pending = PendingAck {
            relay_url,
            key,
            rx: Some(rx),
            ready: None,
        };
        (ack, pending)
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    pub fn key(&self) -> &AckKey {
        &self.key
    }

    pub fn message_id(&self) -> &str {
        self.key.id()
    }

    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }

    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }

    /// Record the relay's success flag. Has no effect once resolved.
    pub fn set_success(&self, success: bool) {
        let mut state = self.state.lock();
        if state.resolver.is_some() {
            state.success = success;
        }
    }

    /// Record the relay's message text. Has no effect once resolved.
    pub fn set_message(&self, message: impl Into<String>) {
        let mut state = self.state.lock();
        if state.resolver.is_some() {
            state.message = message.into();
        }
    }

    /// The recorded success flag.
    pub fn success(&self) -> bool {
        self.state.lock().success
    }

    pub fn is_resolved(&self) -> bool {
        self.state.lock().resolver.is_none()
    }

    /// Resolve as accepted with the recorded message.
    ///
    /// Returns `false` if the ack was already resolved.
    pub fn call_success_callback(&self) -> bool {
        let mut state = self.state.lock();
        self.fire(&mut state, true)
    }

    /// Resolve as failed with the recorded message.
    ///
    /// Returns `false` if the ack was already resolved.
    pub fn call_failure_callback(&self) -> bool {
        let mut state = self.state.lock();
        self.fire(&mut state, false)
    }

    /// Record a relay response and fire the matching callback.
    pub fn resolve(&self, success: bool, message: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        if state.resolver.is_none() {
            return false;
        }
        state.success = success;
        state.message = message.into();
        self.fire(&mut state, success)
    }

    /// Fail the ack because no response arrived in time.
    pub fn expire(&self, after: Duration) -> bool {
        let mut state = self.state.lock();
        if state.resolver.is_none() {
            return false;
        }
        state.timed_out = true;
        state.message = format!("no response after {:?}", after);
        self.fire(&mut state, false)
    }

    fn fire(&self, state: &mut AckState, accepted: bool) -> bool {
        let Some(resolver) = state.resolver.take() else {
            return false;
        };
        let outcome = AckOutcome {
            relay_url: self.relay_url.clone(),
            message_id: self.key.id().to_string(),
            accepted,
            message: state.message.clone(),
            timed_out: state.timed_out,
        };
        // A dropped receiver means the caller abandoned the future.
        let _ = resolver.send(outcome);
        true
    }
}

impl std::fmt::Debug for MessageAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageAck")
            .field("relay_url", &self.relay_url)
            .field("key", &self.key)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Future side of a [`MessageAck`].
#[derive(Debug)]
pub struct PendingAck {
    relay_url: String,
    key: AckKey,
    rx: Option<oneshot::Receiver<AckOutcome>>,
    ready: Option<AckOutcome>,
}

impl PendingAck {
    /// An ack that is already resolved, for messages with no terminal response.
    pub fn accepted(relay_url: impl Into<String>, key: AckKey) -> Self {
        let relay_url = relay_url.into();
        let outcome = AckOutcome {
            relay_url: relay_url.clone(),
            message_id: key.id().to_string(),
            accepted: true,
            message: String::new(),
            timed_out: false,
        };
        Self {
            relay_url,
            key,
            rx: None,
            ready: Some(outcome),
        }
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    pub fn key(&self) -> &AckKey {
        &self.key
    }

    /// Wait for the terminal response without interpreting it.
    pub async fn outcome(mut self) -> Result<AckOutcome> {
        if let Some(outcome) = self.ready.take() {
            return Ok(outcome);
        }
        match self.rx.take() {
            Some(rx) => rx.await.map_err(|_| {
                ClientError::Transport(format!(
                    "ack for {} on {} dropped",
                    self.key.id(),
                    self.relay_url
                ))
            }),
            None => Err(ClientError::Protocol("ack already consumed".to_string())),
        }
    }

    /// Wait for the terminal response: `Ok` on acceptance, otherwise the
    /// recorded relay message as an error.
    pub async fn get(self) -> Result<AckOutcome> {
        let outcome = self.outcome().await?;
        if outcome.accepted {
            Ok(outcome)
        } else if outcome.timed_out {
            Err(ClientError::Timeout(format!(
                "{} on {}: {}",
                outcome.message_id, outcome.relay_url, outcome.message
            )))
        } else {
            Err(ClientError::AckFailure {
                relay: outcome.relay_url,
                message_id: outcome.message_id,
                message: outcome.message,
            })
        }
    }
}
