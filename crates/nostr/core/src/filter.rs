//! NIP-01 subscription filters.
//!
//! Filters define which events a client wants to receive. They support:
//! - Event IDs (or prefixes)
//! - Authors/pubkeys (or prefixes)
//! - Event kinds
//! - Time ranges (since/until)
//! - Tag queries (#e, #p, etc.)
//! - Result limits
//!
//! A filter is an immutable value once built; `matches` is a pure function of
//! the event and the number of results already accepted for this filter.

use crate::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// NIP-01 Filter for subscription requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs (or prefixes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys or prefixes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events created at or after this timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events created at or before this timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events to return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Generic tag queries (#e, #p, etc.)
    /// The key includes the # prefix (e.g., "#e", "#p")
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    /// Create a new empty filter (matches all events).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event IDs.
    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Filter by authors.
    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Filter by kinds.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Filter events created at or after timestamp.
    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Filter events created at or before timestamp.
    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag filter. Accepts either "e" or "#e".
    pub fn tag(
        mut self,
        tag_name: &str,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let key = if tag_name.starts_with('#') {
            tag_name.to_string()
        } else {
            format!("#{}", tag_name)
        };
        self.tags
            .insert(key, values.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Filter by #e (event reference) tags.
    pub fn references_events(self, event_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("e", event_ids)
    }

    /// Filter by #p (pubkey reference) tags.
    pub fn references_pubkeys(self, pubkeys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Check if an event matches this filter, given how many events have
    /// already been accepted for it.
    pub fn matches(&self, event: &Event, count_so_far: usize) -> bool {
        if let Some(limit) = self.limit
            && count_so_far as u64 >= limit
        {
            return false;
        }
        self.matches_event(event)
    }

    /// Check the event against every constraint except `limit`.
    pub fn matches_event(&self, event: &Event) -> bool {
        if let Some(ref ids) = self.ids
            && !ids.iter().any(|id| event.id.starts_with(id.as_str()))
        {
            return false;
        }

        if let Some(ref authors) = self.authors
            && !authors.iter().any(|a| event.pubkey.starts_with(a.as_str()))
        {
            return false;
        }

        if let Some(ref kinds) = self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }

        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }

        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }

        for (tag_key, values) in &self.tags {
            let Some(tag_name) = tag_key.strip_prefix('#') else {
                continue;
            };

            let has_match = event
                .tag_values(tag_name)
                .any(|value| values.iter().any(|v| v == value));

            if !has_match {
                return false;
            }
        }

        true
    }

    /// Check if an event matches any of the filters, ignoring limits.
    pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
        filters.iter().any(|f| f.matches_event(event))
    }
}
