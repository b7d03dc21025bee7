//! Nostr protocol value types.
//!
//! This crate provides:
//! - NIP-01: Event type, kind classification and ordering
//! - NIP-01: Subscription filters with limit-aware matching
//!
//! It performs no I/O and no cryptography; the relay client builds on it.

mod filter;
mod nip01;

pub use filter::Filter;
pub use nip01::{
    Event, KIND_CLIENT_AUTH, KIND_CONTACTS, KIND_METADATA, KIND_SHORT_TEXT_NOTE,
    KindClassification, Nip01Error, classify_kind, is_ephemeral_kind, is_replaceable_kind,
    sort_events,
};
