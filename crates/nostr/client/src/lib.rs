//! Nostr relay pool client for OpenAgents.
//!
//! This crate provides:
//! - Relay connections over a pluggable frame transport (WebSocket by default)
//! - Message parsing (NIP-01 relay protocol)
//! - Subscriptions multiplexed across many relays, with per-event dedup and
//!   EOSE aggregation
//! - Publish acknowledgments aggregated under a configurable policy
//! - Reconnection with re-subscription, and NIP-42 authentication
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr::Filter;
//! use nostr_client::{DEFAULT_RELAYS, RelayPool};
//!
//! #[tokio::main]
//! async fn main() -> nostr_client::Result<()> {
//!     let pool = RelayPool::with_relays(DEFAULT_RELAYS)?;
//!     pool.connect_all().await;
//!
//!     // Attach listeners before opening so no event is missed.
//!     let sub = pool.subscribe(vec![Filter::new().kinds([1]).limit(10)])?;
//!     sub.add_event_listener(|_, event, stored| {
//!         println!("{} (historical: {})", event.id, stored);
//!     });
//!     sub.add_eose_listener(|sub, relay, everywhere| {
//!         if everywhere {
//!             println!("{} caught up on every relay (last: {})", sub.id(), relay);
//!         }
//!     });
//!     sub.open()?;
//!
//!     sub.wait_for_eose().await;
//!     pool.close();
//!     Ok(())
//! }
//! ```

mod ack;
mod error;
mod listeners;
mod message;
mod pool;
mod reconnect;
mod relay;
mod store;
mod subscription;
mod transport;

pub use ack::{AckOutcome, MessageAck, PendingAck};
pub use error::{ClientError, Result};
pub use listeners::ListenerId;
pub use message::{AckKey, ClientMessage, MessageError, RelayMessage};
pub use pool::{
    AuthSigner, Fetched, PoolConfig, PoolEvent, PublishOutcome, PublishPolicy, RelayPool,
    RelayPoolBuilder, RelayStatus,
};
pub use reconnect::{ExponentialBackoff, NoReconnect, ReconnectConfig, ReconnectPolicy};
pub use relay::{ConnectionState, Relay, RelayConfig, RelayHandler, normalize_relay_url};
pub use store::{EventStore, EventStoreConfig};
pub use subscription::{
    Subscription, SubscriptionEvent, SubscriptionStatus, generate_subscription_id,
};
pub use transport::{Connection, FrameSink, Transport, TransportEvent, WebSocketTransport};

/// Default relays for OpenAgents.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://nostr.wine",
];

/// Create a relay pool with the default OpenAgents relays added.
pub fn default_pool() -> Result<RelayPool> {
    RelayPool::with_relays(DEFAULT_RELAYS)
}
