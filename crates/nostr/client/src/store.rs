//! Non-durable, deduplicating cache of seen events.
//!
//! Entries are weak references keyed by event id and indexed by creation
//! time. An entry disappears once nothing else holds the event, except for
//! the `max_retained` most recently added events, which the store keeps
//! strongly so recent history survives deterministically. A miss never means
//! the event did not exist, only that it is no longer retained.

use nostr::{Event, Filter};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Configuration for the event store
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Whether to record events at all
    pub enabled: bool,
    /// Number of most recently added events held strongly
    pub max_retained: usize,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retained: 1000,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    /// Events by ID
    entries: HashMap<String, Weak<Event>>,
    /// (created_at, id) scan order
    by_time: BTreeSet<(u64, String)>,
    /// Strong references to the most recently added events, oldest first
    retained: VecDeque<Arc<Event>>,
}

impl StoreInner {
    fn remove(&mut self, id: &str, created_at: u64) {
        self.entries.remove(id);
        self.by_time.remove(&(created_at, id.to_string()));
    }
}

/// Deduplicating event cache, safe under concurrent add and scan.
pub struct EventStore {
    config: EventStoreConfig,
    inner: RwLock<StoreInner>,
}

impl EventStore {
    /// Create a new event store with default config
    pub fn new() -> Self {
        Self::with_config(EventStoreConfig::default())
    }

    /// Create a new event store with custom config
    pub fn with_config(config: EventStoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Record an event. Returns `false` if a live entry with the same id was
    /// already present.
    pub fn add_event(&self, event: &Arc<Event>) -> bool {
        if !self.config.enabled {
            return false;
        }

        let mut inner = self.inner.write();

        if let Some(existing) = inner.entries.get(&event.id)
            && existing.strong_count() > 0
        {
            return false;
        }

        inner.entries.insert(event.id.clone(), Arc::downgrade(event));
        inner.by_time.insert((event.created_at, event.id.clone()));

        if self.config.max_retained > 0 {
            if inner.retained.len() >= self.config.max_retained {
                inner.retained.pop_front();
            }
            inner.retained.push_back(Arc::clone(event));
        }

        true
    }

    /// Get an event by ID if it is still reachable
    pub fn get(&self, event_id: &str) -> Option<Arc<Event>> {
        self.inner.read().entries.get(event_id)?.upgrade()
    }

    /// Scan retained events, newest first, appending matches to `results`.
    ///
    /// Each filter honors its own `limit`; an event matched by several
    /// filters is appended once. Entries whose event has been reclaimed are
    /// pruned afterwards. Returns the number of events appended.
    pub fn get_events(&self, filters: &[Filter], results: &mut Vec<Arc<Event>>) -> usize {
        let mut dead: Vec<(u64, String)> = Vec::new();
        let mut added: HashSet<String> = HashSet::new();

        {
            let inner = self.inner.read();
            for filter in filters {
                let mut count = 0usize;
                for (created_at, id) in inner.by_time.iter().rev() {
                    let Some(event) = inner.entries.get(id).and_then(Weak::upgrade) else {
                        dead.push((*created_at, id.clone()));
                        continue;
                    };
                    if !filter.matches(&event, count) {
                        if filter.limit.is_some_and(|limit| count as u64 >= limit) {
                            break;
                        }
                        continue;
                    }
                    count += 1;
                    if added.insert(event.id.clone()) {
                        results.push(event);
                    }
                }
            }
        }

        if !dead.is_empty() {
            self.prune(dead);
        }

        added.len()
    }

    fn prune(&self, dead: Vec<(u64, String)>) {
        let mut inner = self.inner.write();
        let mut pruned = 0usize;
        for (created_at, id) in dead {
            // Re-check: the id may have been re-added since the scan.
            let reclaimed = inner
                .entries
                .get(&id)
                .is_some_and(|weak| weak.strong_count() == 0);
            if reclaimed {
                inner.remove(&id, created_at);
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!("Pruned {} reclaimed events from store", pruned);
        }
    }

    /// Number of entries, including ones not yet pruned
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all events from the store
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.by_time.clear();
        inner.retained.clear();
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}
