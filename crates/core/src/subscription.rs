//! Subscription Registry
//!
//! Each entry keeps its subscribers in subscription order. Unsubscribing
//! only flips a shared active flag, so the same handle can be reactivated
//! until the entry is evicted. At most [`RETAINED_INACTIVE`] inactive
//! subscribers are kept per entry; the oldest beyond that are dropped when
//! a new subscriber arrives and can no longer be reactivated.
//! Notification passes carry [`Listener`]s that
//! check the flag at delivery time: a subscriber switched off halfway
//! through a pass does not hear the rest of it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::entry::EntrySnapshot;
use crate::key::ResourceKey;

/// Inactive subscribers kept per entry for reactivation
pub const RETAINED_INACTIVE: usize = 32;

/// Callback invoked with a snapshot after every mutation of its entry
pub type Callback<T> = Arc<dyn Fn(&EntrySnapshot<T>) + Send + Sync>;

/// Identifies one subscription; returned by
/// [`ResourceManager::subscribe`](crate::ResourceManager::subscribe)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub(crate) id: u64,
    pub(crate) key: ResourceKey,
}

impl SubscriptionHandle {
    /// Key of the entry this handle observes
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }
}

/// A subscriber's callback together with its live active flag
pub(crate) struct Listener<T> {
    active: Arc<AtomicBool>,
    callback: Callback<T>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self { active: Arc::clone(&self.active), callback: Arc::clone(&self.callback) }
    }
}

impl<T> Listener<T> {
    pub(crate) fn notify(&self, snapshot: &EntrySnapshot<T>) {
        if self.active.load(Ordering::SeqCst) {
            (self.callback)(snapshot);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct Subscriber<T> {
    id: u64,
    listener: Listener<T>,
}

/// Ordered subscribers of a single entry
pub(crate) struct SubscriberList<T> {
    subscribers: Vec<Subscriber<T>>,
}

impl<T> Default for SubscriberList<T> {
    fn default() -> Self {
        Self { subscribers: Vec::new() }
    }
}

impl<T> fmt::Debug for SubscriberList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberList")
            .field("total", &self.subscribers.len())
            .field("active", &self.active_count())
            .finish()
    }
}

impl<T> SubscriberList<T> {
    pub(crate) fn add(&mut self, id: u64, callback: Callback<T>) {
        self.prune_inactive();
        let listener = Listener { active: Arc::new(AtomicBool::new(true)), callback };
        self.subscribers.push(Subscriber { id, listener });
    }

    /// Returns whether the subscription existed and was active
    pub(crate) fn deactivate(&mut self, id: u64) -> bool {
        self.set_active(id, false)
    }

    /// Returns whether the subscription existed and was inactive
    pub(crate) fn reactivate(&mut self, id: u64) -> bool {
        self.set_active(id, true)
    }

    fn set_active(&mut self, id: u64, active: bool) -> bool {
        match self.subscribers.iter().find(|s| s.id == id) {
            Some(subscriber) => subscriber.listener.active.swap(active, Ordering::SeqCst) != active,
            None => false,
        }
    }

    /// Drop the oldest inactive subscribers beyond [`RETAINED_INACTIVE`]
    fn prune_inactive(&mut self) {
        let inactive = self.subscribers.len() - self.active_count();
        let mut excess = inactive.saturating_sub(RETAINED_INACTIVE);
        if excess == 0 {
            return;
        }
        self.subscribers.retain(|s| {
            if excess > 0 && !s.listener.is_active() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.subscribers.iter().any(|s| s.id == id)
    }

    pub(crate) fn active_count(&self) -> usize {
        self.subscribers.iter().filter(|s| s.listener.is_active()).count()
    }

    /// Listeners of the active subscribers, in subscription order
    pub(crate) fn active_listeners(&self) -> Vec<Listener<T>> {
        self.subscribers
            .iter()
            .filter(|s| s.listener.is_active())
            .map(|s| s.listener.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> Callback<u32> {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &EntrySnapshot<u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_deactivate_and_reactivate() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut list = SubscriberList::default();
        list.add(1, counting(&hits));
        list.add(2, counting(&hits));
        assert_eq!(list.active_count(), 2);

        assert!(list.deactivate(1));
        assert!(!list.deactivate(1), "already inactive");
        assert_eq!(list.active_count(), 1);
        assert!(list.contains(1), "inactive subscribers are kept");

        assert!(list.reactivate(1));
        assert!(!list.reactivate(1), "already active");
        assert!(!list.reactivate(99), "unknown id");
        assert_eq!(list.active_count(), 2);
    }

    /// Validates that churn through subscribe/unsubscribe keeps the list
    /// bounded while active subscribers and the newest inactive ones stay.
    ///
    /// # Test Steps
    /// 1. Add one subscriber that stays active
    /// 2. Add and deactivate more subscribers than are retained
    /// 3. Add one more and check which ids survived
    #[test]
    fn test_inactive_subscribers_are_pruned() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut list = SubscriberList::default();
        list.add(1_000, counting(&hits));

        let churned = RETAINED_INACTIVE as u64 + 5;
        for id in 0..churned {
            list.add(id, counting(&hits));
            list.deactivate(id);
        }
        list.add(2_000, counting(&hits));

        assert_eq!(list.subscribers.len(), RETAINED_INACTIVE + 2);
        assert_eq!(list.active_count(), 2);
        assert!(list.contains(1_000), "active subscribers are never pruned");
        assert!(!list.contains(0), "oldest inactive subscriber dropped");
        assert!(!list.contains(4));
        assert!(list.contains(5));
        assert!(list.contains(churned - 1));
        assert!(!list.reactivate(0), "pruned handle cannot come back");
        assert!(list.reactivate(5));
    }

    /// Validates that listeners come back in subscription order, skip
    /// inactive subscribers, and honor deactivation after collection.
    #[test]
    fn test_active_listeners_keep_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut list: SubscriberList<u32> = SubscriberList::default();
        for id in 1..=3 {
            let order = Arc::clone(&order);
            list.add(id, Arc::new(move |_: &EntrySnapshot<u32>| order.lock().push(id)));
        }
        list.deactivate(2);

        let key = crate::key::KeyCodec::normalize("k").expect("valid key");
        let snapshot = crate::entry::ResourceEntry::<u32>::new(std::time::Instant::now())
            .snapshot(&key);
        let listeners = list.active_listeners();
        assert_eq!(listeners.len(), 2);
        for listener in &listeners {
            listener.notify(&snapshot);
        }
        assert_eq!(*order.lock(), vec![1, 3]);

        list.deactivate(3);
        for listener in &listeners {
            listener.notify(&snapshot);
        }
        assert_eq!(*order.lock(), vec![1, 3, 1], "deactivated listener stays silent");
    }
}
