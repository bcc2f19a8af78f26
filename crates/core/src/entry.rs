//! Resource entries and their state machine
//!
//! ```text
//!          begin_fetch
//!   Idle ─────────────▶ Pending ──settle──▶ Success | Failure
//!    ▲                    │   ▲                     │
//!    └─ invalidate/cancel ┘   └──── begin_fetch ────┘
//! ```
//!
//! Every transition that starts a new unit of work takes a fresh generation
//! and resets the retry count. The manager only settles an entry when the
//! completing fetch carries the entry's current generation.

use std::time::{Duration, Instant};

use arlm_common::impl_status_conversions;

use crate::config::RequestOptions;
use crate::error::FetchError;
use crate::key::ResourceKey;
use crate::producer::Producer;
use crate::suspense::{InFlight, PendingSignal, ReadState};

/// Monotonic fetch generation; 0 means no fetch was ever started
pub type Generation = u64;

/// Lifecycle state of a resource entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Idle,
    Pending,
    Success,
    Failure,
}

impl_status_conversions!(ResourceState {
    Idle => "idle",
    Pending => "pending",
    Success => "success",
    Failure => "failure",
});

impl ResourceState {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Producer and options of the most recent request, kept so a read of an
/// idle entry can restart the fetch
#[derive(Debug)]
pub(crate) struct LastRequest<T> {
    pub(crate) producer: Producer<T>,
    pub(crate) options: RequestOptions,
}

impl<T> Clone for LastRequest<T> {
    fn clone(&self) -> Self {
        Self { producer: self.producer.clone(), options: self.options.clone() }
    }
}

/// One cached resource
#[derive(Debug)]
pub struct ResourceEntry<T> {
    pub(crate) state: ResourceState,
    pub(crate) value: Option<T>,
    pub(crate) error: Option<FetchError>,
    pub(crate) generation: Generation,
    pub(crate) retry_count: u32,
    pub(crate) last_settled_at: Option<Instant>,
    pub(crate) in_flight: Option<InFlight>,
    pub(crate) last_request: Option<LastRequest<T>>,
    /// When the entry last lost (or was created without) an active observer
    pub(crate) unobserved_since: Option<Instant>,
}

impl<T> ResourceEntry<T> {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            state: ResourceState::Idle,
            value: None,
            error: None,
            generation: 0,
            retry_count: 0,
            last_settled_at: None,
            in_flight: None,
            last_request: None,
            unobserved_since: Some(now),
        }
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_settled_at(&self) -> Option<Instant> {
        self.last_settled_at
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn pending_signal(&self) -> Option<PendingSignal> {
        self.in_flight.as_ref().map(InFlight::signal)
    }

    pub(crate) fn intent(&self) -> Option<&str> {
        self.last_request.as_ref().and_then(|r| r.options.intent.as_deref())
    }

    /// Whether a successful value is still inside its freshness window
    pub(crate) fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        if self.state != ResourceState::Success {
            return false;
        }
        match self.last_settled_at {
            _ if ttl.is_zero() => true,
            Some(at) => now.saturating_duration_since(at) < ttl,
            None => false,
        }
    }

    /// Whether a settled entry is young enough to answer a repeat request
    pub(crate) fn within_dedup_window(&self, window: Duration, now: Instant) -> bool {
        match self.last_settled_at {
            Some(at) if self.state.is_settled() && !window.is_zero() => {
                now.saturating_duration_since(at) < window
            }
            _ => false,
        }
    }

    /// Start a new unit of work; returns the fetch it superseded, if any
    pub(crate) fn begin_fetch(
        &mut self,
        generation: Generation,
        request: LastRequest<T>,
    ) -> Option<InFlight> {
        self.state = ResourceState::Pending;
        self.value = None;
        self.error = None;
        self.generation = generation;
        self.retry_count = 0;
        self.last_request = Some(request);
        self.in_flight.replace(InFlight::new())
    }

    pub(crate) fn record_retry(&mut self, retry_count: u32) {
        self.retry_count = retry_count;
    }

    /// Settle the current generation
    pub(crate) fn settle(
        &mut self,
        result: Result<T, FetchError>,
        now: Instant,
    ) -> Option<InFlight> {
        match result {
            Ok(value) => {
                self.state = ResourceState::Success;
                self.value = Some(value);
                self.error = None;
            }
            Err(error) => {
                self.state = ResourceState::Failure;
                self.value = None;
                self.error = Some(error);
            }
        }
        self.last_settled_at = Some(now);
        self.in_flight.take()
    }

    /// Move to a new generation without starting work
    ///
    /// A pending entry falls back to idle; settled entries keep their state.
    pub(crate) fn cancel(&mut self, generation: Generation) -> Option<InFlight> {
        self.generation = generation;
        self.retry_count = 0;
        if self.state == ResourceState::Pending {
            self.state = ResourceState::Idle;
        }
        self.in_flight.take()
    }

    /// Back to idle with nothing cached
    pub(crate) fn reset(&mut self, generation: Generation) -> Option<InFlight> {
        let superseded = self.cancel(generation);
        self.state = ResourceState::Idle;
        self.value = None;
        self.error = None;
        self.last_settled_at = None;
        superseded
    }

    /// Time since the entry was last observed or settled, whichever is later
    pub(crate) fn idle_for(&self, now: Instant) -> Option<Duration> {
        let since = match (self.unobserved_since, self.last_settled_at) {
            (Some(unobserved), Some(settled)) => unobserved.max(settled),
            (Some(unobserved), None) => unobserved,
            (None, _) => return None,
        };
        Some(now.saturating_duration_since(since))
    }
}

impl<T: Clone> ResourceEntry<T> {
    pub(crate) fn read_state(&self) -> ReadState<T> {
        match (self.state, &self.value, &self.error) {
            (ResourceState::Success, Some(value), _) => ReadState::Success(value.clone()),
            (ResourceState::Failure, _, Some(error)) => ReadState::Failure(error.clone()),
            (ResourceState::Pending, ..) => {
                ReadState::Pending(self.pending_signal().unwrap_or_else(PendingSignal::immediate))
            }
            _ => ReadState::Idle,
        }
    }

    pub(crate) fn snapshot(&self, key: &ResourceKey) -> EntrySnapshot<T> {
        EntrySnapshot {
            key: key.clone(),
            state: self.state,
            value: self.value.clone(),
            error: self.error.clone(),
            generation: self.generation,
            retry_count: self.retry_count,
            last_settled_at: self.last_settled_at,
            in_flight: self.in_flight.is_some(),
        }
    }
}

/// Point-in-time copy of an entry, as delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot<T> {
    pub key: ResourceKey,
    pub state: ResourceState,
    pub value: Option<T>,
    pub error: Option<FetchError>,
    pub generation: Generation,
    pub retry_count: u32,
    pub last_settled_at: Option<Instant>,
    pub in_flight: bool,
}
