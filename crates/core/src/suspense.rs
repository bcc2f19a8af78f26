//! Suspense Bridge primitives
//!
//! A pending read hands out a [`PendingSignal`]: a cloneable future that
//! resolves once the fetch it belongs to stops being pending (settled,
//! superseded, invalidated or evicted). It carries no value; the caller
//! reads again after awaiting it.
//!
//! [`ReadState`] is the non-blocking view of an entry used by
//! [`ResourceManager::poll`](crate::ResourceManager::poll).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::error::FetchError;

/// Awaitable handle on an in-flight fetch
#[derive(Clone)]
pub struct PendingSignal {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl PendingSignal {
    /// A signal that is already resolved
    ///
    /// Handed out when the fetch that would back a pending read could not be
    /// started yet, so the caller simply reads again.
    pub fn immediate() -> Self {
        Self { inner: futures::future::ready(()).boxed().shared() }
    }

    /// Whether awaiting the signal would complete right away
    pub fn is_resolved(&self) -> bool {
        self.inner.clone().now_or_never().is_some()
    }
}

impl fmt::Debug for PendingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSignal").field("resolved", &self.is_resolved()).finish()
    }
}

impl Future for PendingSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.poll_unpin(cx)
    }
}

/// Resolving side of a [`PendingSignal`], stored on the pending entry
///
/// Dropping it resolves the signal as well, so an evicted entry never
/// leaves readers hanging.
pub(crate) struct InFlight {
    signal: PendingSignal,
    notifier: oneshot::Sender<()>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        let (notifier, receiver) = oneshot::channel::<()>();
        let signal = PendingSignal { inner: receiver.map(|_| ()).boxed().shared() };
        Self { signal, notifier }
    }

    pub(crate) fn signal(&self) -> PendingSignal {
        self.signal.clone()
    }

    /// Wake everyone awaiting this fetch
    pub(crate) fn resolve(self) {
        let _ = self.notifier.send(());
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight").field("signal", &self.signal).finish()
    }
}

/// Non-blocking view of an entry
#[derive(Debug, Clone)]
pub enum ReadState<T> {
    /// Unknown key, never fetched, or invalidated
    Idle,
    Pending(PendingSignal),
    Success(T),
    Failure(FetchError),
}

impl<T> ReadState<T> {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Failure(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }
}
