//! Entry Store
//!
//! The only owner of resource state. It lives behind the manager's lock, so
//! every method here runs as one atomic mutation. Mutating methods return a
//! [`Notification`] for the subscribers of the touched entry; the manager
//! delivers it after the lock is released.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::entry::{EntrySnapshot, Generation, ResourceEntry, ResourceState};
use crate::key::ResourceKey;
use crate::subscription::{Listener, SubscriberList};

/// Snapshot plus the listeners that must see it
pub(crate) struct Notification<T> {
    pub(crate) listeners: Vec<Listener<T>>,
    pub(crate) snapshot: EntrySnapshot<T>,
}

impl<T> Notification<T> {
    pub(crate) fn deliver(self) {
        for listener in &self.listeners {
            listener.notify(&self.snapshot);
        }
    }
}

#[derive(Debug)]
pub(crate) struct Slot<T> {
    pub(crate) entry: ResourceEntry<T>,
    pub(crate) subscribers: SubscriberList<T>,
}

#[derive(Debug)]
pub(crate) struct EntryStore<T> {
    slots: HashMap<ResourceKey, Slot<T>>,
    // Shared by all keys, so a key re-created after eviction never reuses a
    // generation an old completion could still carry.
    last_generation: Generation,
}

impl<T> Default for EntryStore<T> {
    fn default() -> Self {
        Self { slots: HashMap::new(), last_generation: 0 }
    }
}

impl<T> EntryStore<T> {
    pub(crate) fn get(&self, key: &ResourceKey) -> Option<&ResourceEntry<T>> {
        self.slots.get(key).map(|slot| &slot.entry)
    }

    pub(crate) fn slot_mut(&mut self, key: &ResourceKey) -> Option<&mut Slot<T>> {
        self.slots.get_mut(key)
    }

    /// Existing slot, or a fresh idle one
    pub(crate) fn slot_or_insert(&mut self, key: &ResourceKey, now: Instant) -> &mut Slot<T> {
        self.slots.entry(key.clone()).or_insert_with(|| Slot {
            entry: ResourceEntry::new(now),
            subscribers: SubscriberList::default(),
        })
    }

    pub(crate) fn next_generation(&mut self) -> Generation {
        self.last_generation += 1;
        self.last_generation
    }

    pub(crate) fn evict(&mut self, key: &ResourceKey) -> Option<Slot<T>> {
        self.slots.remove(key)
    }

    /// Keys with no active subscriber for at least `grace`
    ///
    /// Pending entries are skipped; their fetch settles first.
    pub(crate) fn expired_keys(&self, grace: Duration, now: Instant) -> Vec<ResourceKey> {
        self.slots
            .iter()
            .filter(|(_, slot)| {
                slot.subscribers.active_count() == 0
                    && slot.entry.state != ResourceState::Pending
                    && slot.entry.idle_for(now).is_some_and(|idle| idle >= grace)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl<T: Clone> EntryStore<T> {
    /// Apply `mutation` to the entry for `key`, creating it if needed
    pub(crate) fn upsert<R>(
        &mut self,
        key: &ResourceKey,
        now: Instant,
        mutation: impl FnOnce(&mut ResourceEntry<T>) -> R,
    ) -> (R, Notification<T>) {
        let slot = self.slot_or_insert(key, now);
        let result = mutation(&mut slot.entry);
        (result, Self::notification(key, slot))
    }

    pub(crate) fn notification(key: &ResourceKey, slot: &Slot<T>) -> Notification<T> {
        Notification {
            listeners: slot.subscribers.active_listeners(),
            snapshot: slot.entry.snapshot(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestOptions;
    use crate::entry::LastRequest;
    use crate::key::KeyCodec;
    use crate::producer::Producer;

    fn key(name: &str) -> ResourceKey {
        KeyCodec::normalize(name).expect("valid key")
    }

    fn last_request() -> LastRequest<u32> {
        LastRequest {
            producer: Producer::new(|| async { Ok(1) }),
            options: RequestOptions::default(),
        }
    }

    #[test]
    fn test_generations_are_global() {
        let mut store: EntryStore<u32> = EntryStore::default();
        let a = store.next_generation();
        let b = store.next_generation();
        assert!(b > a);

        let now = Instant::now();
        let generation = store.next_generation();
        store.upsert(&key("a"), now, |entry| entry.begin_fetch(generation, last_request()));
        assert!(store.evict(&key("a")).is_some());

        let again = store.next_generation();
        assert!(again > generation, "evicted keys never reuse a generation");
    }

    #[test]
    fn test_upsert_creates_and_snapshots() {
        let mut store: EntryStore<u32> = EntryStore::default();
        let now = Instant::now();
        let generation = store.next_generation();

        let (_, notification) = store.upsert(&key("user:1"), now, |entry| {
            entry.begin_fetch(generation, last_request())
        });

        assert_eq!(store.len(), 1);
        assert!(notification.listeners.is_empty());
        assert_eq!(notification.snapshot.state, ResourceState::Pending);
        assert_eq!(notification.snapshot.generation, generation);
        let state = store.get(&key("user:1")).map(ResourceEntry::state);
        assert_eq!(state, Some(ResourceState::Pending));
    }

    /// Validates that only unobserved, settled-or-idle entries past the grace
    /// period are reported.
    #[test]
    fn test_expired_keys_respect_grace_and_pending() {
        let mut store: EntryStore<u32> = EntryStore::default();
        let start = Instant::now();
        let grace = Duration::from_secs(30);

        store.slot_or_insert(&key("idle"), start);
        let generation = store.next_generation();
        store.upsert(&key("pending"), start, |entry| entry.begin_fetch(generation, last_request()));
        let watched = store.slot_or_insert(&key("watched"), start);
        watched.subscribers.add(1, std::sync::Arc::new(|_: &EntrySnapshot<u32>| {}));
        watched.entry.unobserved_since = None;

        assert!(store.expired_keys(grace, start + Duration::from_secs(29)).is_empty());

        let expired = store.expired_keys(grace, start + Duration::from_secs(30));
        assert_eq!(expired, vec![key("idle")]);
    }
}
