//! Fetch Coordinator
//!
//! [`ResourceManager`] owns the entry store and is the only thing that
//! mutates it. Every mutation happens under one short lock and never across
//! an await; the producer itself runs on a spawned task and reports back
//! through a completion step that drops results whose
//! generation was superseded in the meantime.
//!
//! Subscriber callbacks run after the lock is released, in mutation order,
//! from a single dispatch loop. Mutations a callback triggers on the same
//! thread are queued and applied once the current pass has been delivered,
//! so callbacks never re-enter a half-finished notification pass.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use arlm_common::error::CommonError;
use arlm_common::resilience::{policies::ClassifiedRetry, RetryError, RetryExecutor, RetryObserver};
use arlm_common::time::{Clock, SystemClock};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{ManagerConfig, RequestOptions};
use crate::debounce::DebounceGate;
use crate::entry::{EntrySnapshot, Generation, LastRequest, ResourceEntry, ResourceState};
use crate::error::{FetchError, FetchResult, ReadError, ResourceError, ResourceResult};
use crate::key::{KeyCodec, ResourceKey};
use crate::producer::Producer;
use crate::stats::{ManagerStats, StatsCollector};
use crate::store::{EntryStore, Notification};
use crate::subscription::SubscriptionHandle;
use crate::suspense::{PendingSignal, ReadState};

/// How a request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new fetch was started under this generation
    Started(Generation),
    /// Joined the fetch already pending under this generation
    Deduplicated(Generation),
    /// Answered by a fresh or recently settled entry
    Cached(Generation),
    /// Issued from a subscriber callback; applied after the current
    /// notification pass
    Queued,
}

impl RequestOutcome {
    /// Generation the caller should expect; `None` while queued
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Self::Started(g) | Self::Deduplicated(g) | Self::Cached(g) => Some(*g),
            Self::Queued => None,
        }
    }

    /// Whether this call launched a new fetch
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Mutation requested from inside a subscriber callback
enum Deferred<T> {
    Request { key: ResourceKey, producer: Producer<T>, options: RequestOptions },
    Invalidate(ResourceKey),
    InvalidateGeneration(ResourceKey),
    Evict(ResourceKey),
}

struct Dispatch<T> {
    notifications: VecDeque<Notification<T>>,
    deferred: VecDeque<Deferred<T>>,
    dispatcher: Option<ThreadId>,
}

impl<T> Default for Dispatch<T> {
    fn default() -> Self {
        Self { notifications: VecDeque::new(), deferred: VecDeque::new(), dispatcher: None }
    }
}

/// Clears the dispatcher slot if a callback panics mid-pass
struct DispatchGuard<'a, T> {
    dispatch: &'a Mutex<Dispatch<T>>,
}

impl<T> Drop for DispatchGuard<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.dispatch.lock().dispatcher = None;
        }
    }
}

enum Step<T> {
    Notify(Notification<T>),
    Apply(Deferred<T>),
}

struct Inner<T> {
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    store: Mutex<EntryStore<T>>,
    dispatch: Mutex<Dispatch<T>>,
    next_subscription: AtomicU64,
    debounce: DebounceGate,
    stats: StatsCollector,
}

/// Keyed cache of asynchronously produced values
///
/// Cloning is cheap; clones share the same entries.
pub struct ResourceManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResourceManager<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for ResourceManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.store.lock().len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> ResourceManager<T> {
    /// Create a manager on the system clock
    ///
    /// # Errors
    ///
    /// [`ResourceError::Config`] when `config` fails validation.
    pub fn new(config: ManagerConfig) -> ResourceResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager measuring freshness and eviction against `clock`
    pub fn with_clock(config: ManagerConfig, clock: Arc<dyn Clock>) -> ResourceResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                store: Mutex::new(EntryStore::default()),
                dispatch: Mutex::new(Dispatch::default()),
                next_subscription: AtomicU64::new(0),
                debounce: DebounceGate::new(),
                stats: StatsCollector::default(),
            }),
        })
    }

    /// Validated configuration the manager was built with
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Request options built from the manager's configuration
    pub fn options(&self) -> RequestOptions {
        self.inner.config.request_options()
    }

    /// Gate shared by [`request_debounced`](Self::request_debounced) calls
    pub fn debounce_gate(&self) -> &DebounceGate {
        &self.inner.debounce
    }

    /// Counters since creation, plus the current entry count
    pub fn stats(&self) -> ManagerStats {
        let entries = self.inner.store.lock().len();
        self.inner.stats.snapshot(entries)
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Ask for the resource behind `descriptor`
    ///
    /// Joins a pending fetch with the same intent, answers from a fresh
    /// value, or starts `producer` under a new generation. Never blocks on
    /// the producer. Must be called from within a tokio runtime; this holds
    /// for calls made from subscriber callbacks too, which are queued and
    /// report [`RequestOutcome::Queued`] only when a runtime is present.
    pub fn request<D, P, Fut>(
        &self,
        descriptor: &D,
        producer: P,
        options: RequestOptions,
    ) -> ResourceResult<RequestOutcome>
    where
        D: Serialize + ?Sized,
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        self.request_with(descriptor, Producer::new(producer), options)
    }

    /// [`request`](Self::request) with an already built [`Producer`]
    pub fn request_with<D>(
        &self,
        descriptor: &D,
        producer: Producer<T>,
        options: RequestOptions,
    ) -> ResourceResult<RequestOutcome>
    where
        D: Serialize + ?Sized,
    {
        let key = KeyCodec::normalize(descriptor)?;
        self.submit(key, producer, options)
    }

    /// Request through the debounce gate
    ///
    /// Bursts on the same `channel` collapse into the last call, which is
    /// issued once `options.debounce` has passed without another call.
    pub fn request_debounced<D, P, Fut>(
        &self,
        channel: impl Into<String>,
        descriptor: &D,
        producer: P,
        options: RequestOptions,
    ) -> ResourceResult<()>
    where
        D: Serialize + ?Sized,
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let key = KeyCodec::normalize(descriptor)?;
        Handle::try_current().map_err(|_| ResourceError::NoRuntime)?;

        let manager = self.clone();
        let producer = Producer::new(producer);
        let delay = options.debounce;
        self.inner.debounce.schedule(channel, delay, move || {
            if let Err(error) = manager.submit(key.clone(), producer, options) {
                warn!(key = %key, error = %error, "Debounced request failed");
            }
        });
        Ok(())
    }

    fn submit(
        &self,
        key: ResourceKey,
        producer: Producer<T>,
        options: RequestOptions,
    ) -> ResourceResult<RequestOutcome> {
        if self.in_callback() {
            Handle::try_current().map_err(|_| ResourceError::NoRuntime)?;
            debug!("Request for '{}' issued from a callback, queued", key);
            self.defer(Deferred::Request { key, producer, options });
            return Ok(RequestOutcome::Queued);
        }
        let outcome = self.start_request(&key, producer, options);
        self.drain();
        outcome
    }

    fn start_request(
        &self,
        key: &ResourceKey,
        producer: Producer<T>,
        options: RequestOptions,
    ) -> ResourceResult<RequestOutcome> {
        let runtime = Handle::try_current().map_err(|_| ResourceError::NoRuntime)?;
        let now = self.inner.clock.now();
        let mut store = self.inner.store.lock();

        if let Some(entry) = store.get(key) {
            let generation = entry.generation();
            if entry.state() == ResourceState::Pending {
                if entry.intent() == options.intent.as_deref() {
                    drop(store);
                    self.inner.stats.record_deduplicated();
                    debug!("Joined pending fetch for '{}' (generation {})", key, generation);
                    return Ok(RequestOutcome::Deduplicated(generation));
                }
            } else if entry.is_fresh(options.ttl, now)
                || entry.within_dedup_window(options.dedup_window, now)
            {
                drop(store);
                self.inner.stats.record_cache_hit();
                debug!("Answered '{}' from settled generation {}", key, generation);
                return Ok(RequestOutcome::Cached(generation));
            }
        }

        let generation = store.next_generation();
        let request = LastRequest { producer: producer.clone(), options: options.clone() };
        let (superseded, notification) =
            store.upsert(key, now, |entry| entry.begin_fetch(generation, request));
        self.enqueue(notification);
        drop(store);

        if let Some(previous) = superseded {
            debug!("Generation {} of '{}' supersedes a pending fetch", generation, key);
            previous.resolve();
        }
        self.inner.stats.record_fetch_started();
        self.spawn_fetch(&runtime, key.clone(), generation, producer, &options);
        Ok(RequestOutcome::Started(generation))
    }

    fn spawn_fetch(
        &self,
        runtime: &Handle,
        key: ResourceKey,
        generation: Generation,
        producer: Producer<T>,
        options: &RequestOptions,
    ) {
        let producer = match options.timeout {
            Some(after) => producer.with_timeout(after),
            None => producer,
        };
        let executor = RetryExecutor::new(options.retry.clone(), ClassifiedRetry);
        let manager = self.clone();
        runtime.spawn(async move {
            manager.run_fetch(key, generation, producer, executor).await;
        });
    }

    #[instrument(skip_all, fields(key = %key, generation = generation))]
    async fn run_fetch(
        self,
        key: ResourceKey,
        generation: Generation,
        producer: Producer<T>,
        executor: RetryExecutor<ClassifiedRetry>,
    ) {
        let observer = FetchObserver { manager: &self, key: &key, generation };
        let outcome = executor.execute_observed(|| producer.call(), observer).await;

        let result = match outcome.result {
            Ok(value) => Ok(value),
            Err(RetryError::Abandoned { attempts }) => {
                debug!("Fetch abandoned after {} attempts, generation superseded", attempts);
                self.inner.stats.record_stale_discard();
                return;
            }
            Err(error) => match error.into_source() {
                Some(source) => Err(source),
                None => return,
            },
        };
        self.complete(&key, generation, result);
    }

    /// Settle `key` with the outcome of `generation`, unless superseded
    fn complete(&self, key: &ResourceKey, generation: Generation, result: FetchResult<T>) {
        let now = self.inner.clock.now();
        let mut store = self.inner.store.lock();

        let current = store.slot_mut(key).filter(|slot| is_pending_at(&slot.entry, generation));
        let Some(slot) = current else {
            drop(store);
            debug!("Discarding stale completion of generation {} for '{}'", generation, key);
            self.inner.stats.record_stale_discard();
            return;
        };

        let success = result.is_ok();
        if let Err(error) = &result {
            warn!(key = %key, generation, kind = error.kind(), error = %error, "Fetch failed");
        }
        let in_flight = slot.entry.settle(result, now);
        let notification = EntryStore::notification(key, slot);
        self.enqueue(notification);
        drop(store);

        self.inner.stats.record_settled(success);
        if let Some(in_flight) = in_flight {
            in_flight.resolve();
        }
        self.drain();
    }

    /// Record a sanctioned retry; false once the generation is stale
    fn record_retry(&self, key: &ResourceKey, generation: Generation, retry_count: u32) -> bool {
        let mut store = self.inner.store.lock();
        let current = store.slot_mut(key).filter(|slot| is_pending_at(&slot.entry, generation));
        let Some(slot) = current else {
            return false;
        };
        slot.entry.record_retry(retry_count);
        let notification = EntryStore::notification(key, slot);
        self.enqueue(notification);
        drop(store);

        self.inner.stats.record_retry();
        self.drain();
        true
    }

    fn is_current(&self, key: &ResourceKey, generation: Generation) -> bool {
        self.inner.store.lock().get(key).is_some_and(|entry| is_pending_at(entry, generation))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Synchronous read for suspense-style consumers
    ///
    /// Returns the value, or [`ReadError::Pending`] with a signal to await
    /// before reading again. Reading an idle entry that was requested before
    /// restarts its last producer.
    pub fn read<D: Serialize + ?Sized>(&self, descriptor: &D) -> Result<T, ReadError> {
        let key = KeyCodec::normalize(descriptor)?;
        self.read_key(key)
    }

    fn read_key(&self, key: ResourceKey) -> Result<T, ReadError> {
        let restart = {
            let store = self.inner.store.lock();
            let Some(entry) = store.get(&key) else {
                return Err(ReadError::Unrequested(key));
            };
            match entry.read_state() {
                ReadState::Success(value) => return Ok(value),
                ReadState::Failure(error) => return Err(ReadError::Failed(error)),
                ReadState::Pending(signal) => return Err(ReadError::Pending(signal)),
                ReadState::Idle => match entry.last_request.clone() {
                    Some(request) => request,
                    None => return Err(ReadError::Unrequested(key)),
                },
            }
        };

        debug!("Read of idle '{}' restarts its last request", key);
        if self.in_callback() {
            if Handle::try_current().is_err() {
                return Err(ReadError::Resource(ResourceError::NoRuntime));
            }
            self.defer(Deferred::Request {
                key,
                producer: restart.producer,
                options: restart.options,
            });
            return Err(ReadError::Pending(PendingSignal::immediate()));
        }
        let started = self.start_request(&key, restart.producer, restart.options);
        self.drain();
        started?;

        match self.poll_key(&key) {
            ReadState::Success(value) => Ok(value),
            ReadState::Failure(error) => Err(ReadError::Failed(error)),
            ReadState::Pending(signal) => Err(ReadError::Pending(signal)),
            ReadState::Idle => Err(ReadError::Pending(PendingSignal::immediate())),
        }
    }

    /// Await the settled value
    ///
    /// Fails with [`ResourceError::Fetch`] when the fetch settles as a
    /// failure and with [`ResourceError::Cancelled`] when the entry is
    /// evicted while waiting.
    pub async fn read_async<D: Serialize + ?Sized>(&self, descriptor: &D) -> ResourceResult<T> {
        let key = KeyCodec::normalize(descriptor)?;
        let mut waited = false;
        loop {
            match self.read_key(key.clone()) {
                Ok(value) => return Ok(value),
                Err(ReadError::Pending(signal)) => {
                    signal.await;
                    waited = true;
                }
                Err(ReadError::Failed(source)) => return Err(ResourceError::Fetch { key, source }),
                Err(ReadError::Unrequested(key)) if waited => {
                    return Err(ResourceError::Cancelled(key))
                }
                Err(ReadError::Unrequested(key)) => return Err(ResourceError::Unrequested(key)),
                Err(ReadError::Resource(error)) => return Err(error),
            }
        }
    }

    /// Current state without starting any work; unknown keys are idle
    pub fn poll<D: Serialize + ?Sized>(&self, descriptor: &D) -> ResourceResult<ReadState<T>> {
        let key = KeyCodec::normalize(descriptor)?;
        Ok(self.poll_key(&key))
    }

    fn poll_key(&self, key: &ResourceKey) -> ReadState<T> {
        self.inner.store.lock().get(key).map_or(ReadState::Idle, ResourceEntry::read_state)
    }

    /// Copy of the entry's state, value, error and generation
    ///
    /// `None` for keys the manager has never seen or has evicted.
    pub fn snapshot<D: Serialize + ?Sized>(
        &self,
        descriptor: &D,
    ) -> ResourceResult<Option<EntrySnapshot<T>>> {
        let key = KeyCodec::normalize(descriptor)?;
        Ok(self.inner.store.lock().get(&key).map(|entry| entry.snapshot(&key)))
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Call `callback` with a snapshot after every mutation of the entry
    ///
    /// Creates an idle entry for unknown keys. Subscribing does not notify.
    pub fn subscribe<D, F>(&self, descriptor: &D, callback: F) -> ResourceResult<SubscriptionHandle>
    where
        D: Serialize + ?Sized,
        F: Fn(&EntrySnapshot<T>) + Send + Sync + 'static,
    {
        let key = KeyCodec::normalize(descriptor)?;
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed) + 1;
        let now = self.inner.clock.now();

        let mut store = self.inner.store.lock();
        let slot = store.slot_or_insert(&key, now);
        slot.subscribers.add(id, Arc::new(callback));
        slot.entry.unobserved_since = None;
        drop(store);

        debug!("Subscription {} added for '{}'", id, key);
        Ok(SubscriptionHandle { id, key })
    }

    /// Stop notifying `handle`; returns whether it was active
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let now = self.inner.clock.now();
        let mut store = self.inner.store.lock();
        let Some(slot) = store.slot_mut(&handle.key) else {
            return false;
        };
        let changed = slot.subscribers.deactivate(handle.id);
        if changed && slot.subscribers.active_count() == 0 {
            slot.entry.unobserved_since = Some(now);
        }
        changed
    }

    /// Reactivate `handle`
    ///
    /// False once its entry was evicted, or once the handle was among the
    /// oldest inactive subscribers pruned past
    /// [`RETAINED_INACTIVE`](crate::subscription::RETAINED_INACTIVE).
    pub fn resubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut store = self.inner.store.lock();
        let Some(slot) = store.slot_mut(&handle.key) else {
            return false;
        };
        if !slot.subscribers.contains(handle.id) {
            return false;
        }
        slot.subscribers.reactivate(handle.id);
        slot.entry.unobserved_since = None;
        true
    }

    // ------------------------------------------------------------------
    // Invalidation and eviction
    // ------------------------------------------------------------------

    /// Drop the cached outcome and fall back to idle
    ///
    /// A fetch still in flight is discarded when it completes. The next
    /// read or request starts over.
    pub fn invalidate<D: Serialize + ?Sized>(&self, descriptor: &D) -> ResourceResult<()> {
        let key = KeyCodec::normalize(descriptor)?;
        if self.in_callback() {
            self.defer(Deferred::Invalidate(key));
            return Ok(());
        }
        self.bump_generation(&key, true);
        self.drain();
        Ok(())
    }

    /// Supersede the in-flight fetch without touching a settled outcome
    pub fn invalidate_generation<D: Serialize + ?Sized>(
        &self,
        descriptor: &D,
    ) -> ResourceResult<()> {
        let key = KeyCodec::normalize(descriptor)?;
        if self.in_callback() {
            self.defer(Deferred::InvalidateGeneration(key));
            return Ok(());
        }
        self.bump_generation(&key, false);
        self.drain();
        Ok(())
    }

    fn bump_generation(&self, key: &ResourceKey, reset: bool) -> bool {
        let mut store = self.inner.store.lock();
        if store.get(key).is_none() {
            return false;
        }
        let generation = store.next_generation();
        let Some(slot) = store.slot_mut(key) else {
            return false;
        };
        let superseded =
            if reset { slot.entry.reset(generation) } else { slot.entry.cancel(generation) };
        let notification = EntryStore::notification(key, slot);
        self.enqueue(notification);
        drop(store);

        debug!("'{}' moved to generation {}", key, generation);
        if let Some(superseded) = superseded {
            superseded.resolve();
        }
        true
    }

    /// Remove the entry and its subscriptions
    ///
    /// Readers waiting on it are woken. Returns whether an entry was
    /// removed; always false when called from a callback, where the
    /// eviction is queued.
    pub fn evict<D: Serialize + ?Sized>(&self, descriptor: &D) -> ResourceResult<bool> {
        let key = KeyCodec::normalize(descriptor)?;
        if self.in_callback() {
            self.defer(Deferred::Evict(key));
            return Ok(false);
        }
        Ok(self.remove_entry(&key))
    }

    fn remove_entry(&self, key: &ResourceKey) -> bool {
        let removed = self.inner.store.lock().evict(key);
        match removed {
            Some(slot) => {
                drop(slot);
                self.inner.stats.record_evictions(1);
                debug!("Evicted '{}'", key);
                true
            }
            None => false,
        }
    }

    /// Evict every entry left unobserved for the configured grace period
    pub fn evict_idle(&self) -> Vec<ResourceKey> {
        let now = self.inner.clock.now();
        let grace = self.inner.config.eviction_grace;

        let mut store = self.inner.store.lock();
        let keys = store.expired_keys(grace, now);
        let removed: Vec<_> = keys.iter().filter_map(|key| store.evict(key)).collect();
        drop(store);
        drop(removed);

        if !keys.is_empty() {
            self.inner.stats.record_evictions(keys.len());
            let grace_ms = grace.as_millis() as u64;
            info!(evicted = keys.len(), grace_ms, "Evicted idle entries");
        }
        keys
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval`
    ///
    /// The task holds only a weak reference and stops once every manager
    /// handle is dropped.
    pub fn spawn_janitor(&self, interval: Duration) -> ResourceResult<JoinHandle<()>> {
        if interval.is_zero() {
            return Err(CommonError::config_field("janitor_interval", "must be positive").into());
        }
        let runtime = Handle::try_current().map_err(|_| ResourceError::NoRuntime)?;
        let inner = Arc::downgrade(&self.inner);

        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    debug!("Manager dropped, janitor stopping");
                    break;
                };
                ResourceManager { inner }.evict_idle();
            }
        }))
    }

    // ------------------------------------------------------------------
    // Notification dispatch
    // ------------------------------------------------------------------

    fn in_callback(&self) -> bool {
        self.inner.dispatch.lock().dispatcher == Some(thread::current().id())
    }

    fn defer(&self, mutation: Deferred<T>) {
        self.inner.dispatch.lock().deferred.push_back(mutation);
    }

    /// Queue a notification; called with the store lock held so passes are
    /// delivered in mutation order
    fn enqueue(&self, notification: Notification<T>) {
        if notification.listeners.is_empty() {
            return;
        }
        self.inner.dispatch.lock().notifications.push_back(notification);
    }

    /// Deliver queued notifications, then apply deferred mutations, until
    /// both queues are empty
    ///
    /// Only one thread dispatches at a time; a thread finding the loop
    /// taken leaves its notifications to the running dispatcher.
    fn drain(&self) {
        {
            let mut dispatch = self.inner.dispatch.lock();
            if dispatch.dispatcher.is_some() {
                return;
            }
            dispatch.dispatcher = Some(thread::current().id());
        }
        let _guard = DispatchGuard { dispatch: &self.inner.dispatch };

        loop {
            let step = {
                let mut dispatch = self.inner.dispatch.lock();
                if let Some(notification) = dispatch.notifications.pop_front() {
                    Step::Notify(notification)
                } else if let Some(mutation) = dispatch.deferred.pop_front() {
                    Step::Apply(mutation)
                } else {
                    dispatch.dispatcher = None;
                    return;
                }
            };
            match step {
                Step::Notify(notification) => notification.deliver(),
                Step::Apply(mutation) => self.apply(mutation),
            }
        }
    }

    fn apply(&self, mutation: Deferred<T>) {
        match mutation {
            Deferred::Request { key, producer, options } => {
                if let Err(error) = self.start_request(&key, producer, options) {
                    warn!(key = %key, error = %error, "Queued request failed");
                }
            }
            Deferred::Invalidate(key) => {
                self.bump_generation(&key, true);
            }
            Deferred::InvalidateGeneration(key) => {
                self.bump_generation(&key, false);
            }
            Deferred::Evict(key) => {
                self.remove_entry(&key);
            }
        }
    }
}

fn is_pending_at<T>(entry: &ResourceEntry<T>, generation: Generation) -> bool {
    entry.generation() == generation && entry.state() == ResourceState::Pending
}

/// Reports retries of one generation back to the manager and abandons the
/// sequence once that generation is superseded
struct FetchObserver<'a, T> {
    manager: &'a ResourceManager<T>,
    key: &'a ResourceKey,
    generation: Generation,
}

impl<T: Clone + Send + Sync + 'static> RetryObserver<FetchError> for FetchObserver<'_, T> {
    fn on_retry(&mut self, retry_count: u32, delay: Duration, error: &FetchError) -> bool {
        debug!("Retry {} for '{}' in {:?} after: {}", retry_count, self.key, delay, error);
        self.manager.record_retry(self.key, self.generation, retry_count)
    }

    fn should_continue(&mut self) -> bool {
        self.manager.is_current(self.key, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use arlm_common::time::MockClock;

    use super::*;

    fn manager() -> ResourceManager<u32> {
        ResourceManager::new(ManagerConfig::default()).expect("default config is valid")
    }

    #[test]
    fn test_request_outside_runtime_fails() {
        let manager = manager();
        let result = manager.request("user:1", || async { Ok(1) }, manager.options());
        assert_eq!(result, Err(ResourceError::NoRuntime));
        assert_eq!(manager.stats().entries, 0, "nothing was stored");
    }

    /// Validates that a callback running outside a runtime learns right away
    /// that its request cannot be queued, instead of seeing `Queued`.
    #[test]
    fn test_callback_request_without_runtime_fails() {
        let manager = manager();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let nested = manager.clone();
        let seen = Arc::clone(&outcomes);
        manager
            .subscribe("user:1", move |_: &EntrySnapshot<u32>| {
                let outcome = nested.request("user:2", || async { Ok(2) }, nested.options());
                seen.lock().push(outcome);
            })
            .expect("subscribe");

        manager.invalidate("user:1").expect("valid key");

        assert_eq!(*outcomes.lock(), vec![Err(ResourceError::NoRuntime)]);
        assert!(manager.snapshot("user:2").expect("valid key").is_none());
        assert_eq!(manager.stats().fetches_started, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ManagerConfig::default();
        config.timeout = Some(Duration::ZERO);
        assert!(matches!(ResourceManager::<u32>::new(config), Err(ResourceError::Config(_))));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let manager = manager();
        assert!(matches!(manager.poll(""), Err(ResourceError::InvalidKey { .. })));
        assert!(matches!(
            manager.read(&()),
            Err(ReadError::Resource(ResourceError::InvalidKey { .. }))
        ));
    }

    #[test]
    fn test_unknown_key_reads() {
        let manager = manager();
        assert!(matches!(manager.read("missing"), Err(ReadError::Unrequested(_))));
        assert!(matches!(manager.poll("missing"), Ok(ReadState::Idle)));
        assert_eq!(manager.snapshot("missing").expect("valid key"), None);
    }

    /// Validates that subscribing creates an idle, observed entry without
    /// notifying, and that handles can be toggled until eviction.
    #[test]
    fn test_subscription_lifecycle() {
        let manager = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = manager
            .subscribe("user:1", move |_: &EntrySnapshot<u32>| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("subscribe");

        assert_eq!(handle.key().as_str(), "user:1");
        let snapshot = manager.snapshot("user:1").expect("valid key").expect("entry created");
        assert_eq!(snapshot.state, ResourceState::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(manager.unsubscribe(&handle));
        assert!(!manager.unsubscribe(&handle));
        assert!(manager.resubscribe(&handle));

        assert!(manager.evict("user:1").expect("valid key"));
        assert!(!manager.resubscribe(&handle));
        assert!(!manager.unsubscribe(&handle));
    }

    #[test]
    fn test_evict_idle_uses_grace_period() {
        let clock = MockClock::new();
        let mut config = ManagerConfig::default();
        config.eviction_grace = Duration::from_secs(60);
        let manager: ResourceManager<u32> =
            ResourceManager::with_clock(config, Arc::new(clock.clone())).expect("valid config");

        let watched = manager.subscribe("watched", |_: &EntrySnapshot<u32>| {}).expect("subscribe");
        let dropped = manager.subscribe("dropped", |_: &EntrySnapshot<u32>| {}).expect("subscribe");
        manager.unsubscribe(&dropped);

        clock.advance(Duration::from_secs(59));
        assert!(manager.evict_idle().is_empty());

        clock.advance(Duration::from_secs(1));
        assert_eq!(manager.evict_idle(), vec![dropped.key().clone()]);
        assert!(manager.snapshot("watched").expect("valid key").is_some());
        assert_eq!(manager.stats().evictions, 1);
        drop(watched);
    }

    #[tokio::test]
    async fn test_janitor_rejects_zero_interval() {
        let manager = manager();
        assert!(matches!(manager.spawn_janitor(Duration::ZERO), Err(ResourceError::Config(_))));
    }

    #[test]
    fn test_debug_reports_entry_count() {
        let manager = manager();
        manager.subscribe("user:1", |_: &EntrySnapshot<u32>| {}).expect("subscribe");
        let rendered = format!("{:?}", manager);
        assert!(rendered.starts_with("ResourceManager"), "{rendered}");
        assert!(rendered.contains("entries: 1"), "{rendered}");
    }

    #[test]
    fn test_outcome_generation() {
        assert_eq!(RequestOutcome::Started(3).generation(), Some(3));
        assert_eq!(RequestOutcome::Cached(2).generation(), Some(2));
        assert_eq!(RequestOutcome::Queued.generation(), None);
        assert!(RequestOutcome::Started(1).is_started());
        assert!(!RequestOutcome::Deduplicated(1).is_started());
    }
}
