//! NIP-01: Basic protocol flow description.
//!
//! This module holds the event value type shared by the client crates:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Kind classification (regular, replaceable, ephemeral, addressable)
//! - Tag accessors and reverse-chronological ordering
//!
//! Signing and verification live with the platform signer; events here are
//! treated as already-signed values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// Parse an event from its JSON object form.
    pub fn from_json(json: &str) -> Result<Self, Nip01Error> {
        let event: Event = serde_json::from_str(json)?;
        if event.id.is_empty() {
            return Err(Nip01Error::InvalidEvent("missing id".to_string()));
        }
        Ok(event)
    }

    /// Serialize the event to its JSON object form.
    pub fn to_json(&self) -> Result<String, Nip01Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Values (second element) of every tag named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.len() >= 2 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }

    /// Value of the first tag named `name`, if any.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.len() >= 2 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }

    /// Classification of this event's kind.
    pub fn classification(&self) -> KindClassification {
        classify_kind(self.kind)
    }
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    /// Unknown classification
    Unknown,
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_CONTACTS: u16 = 3;
/// NIP-42 client authentication event.
pub const KIND_CLIENT_AUTH: u16 = 22242;

/// Classify an event kind according to NIP-01 rules.
pub fn classify_kind(kind: u16) -> KindClassification {
    let k = kind as u32;

    if (1000..10000).contains(&k) || (4..45).contains(&k) || k == 1 || k == 2 {
        return KindClassification::Regular;
    }

    if (10000..20000).contains(&k) || k == 0 || k == 3 {
        return KindClassification::Replaceable;
    }

    if (20000..30000).contains(&k) {
        return KindClassification::Ephemeral;
    }

    if (30000..40000).contains(&k) {
        return KindClassification::Addressable;
    }

    KindClassification::Unknown
}

/// Check if a kind is replaceable.
pub fn is_replaceable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Replaceable)
}

/// Check if a kind is ephemeral.
pub fn is_ephemeral_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Ephemeral)
}

/// Sort events in reverse-chronological order by created_at,
/// then by id (lexicographically) in case of ties.
pub fn sort_events<E: AsRef<Event>>(events: &mut [E]) {
    events.sort_by(|a, b| {
        let (a, b) = (a.as_ref(), b.as_ref());
        match b.created_at.cmp(&a.created_at) {
            std::cmp::Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        }
    });
}

impl AsRef<Event> for Event {
    fn as_ref(&self) -> &Event {
        self
    }
}
