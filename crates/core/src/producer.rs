//! Producer functions
//!
//! A producer is the caller-supplied zero-argument async function that does
//! the actual I/O. It is invoked once per attempt, so it must be safe to
//! call again under retry.
//!
//! A panic inside a producer, while building the attempt or while polling
//! it, settles that attempt as an internal [`FetchError`] instead of
//! unwinding through the fetch task.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use arlm_common::error::CommonError;
use futures::future::{self as future_util, BoxFuture};
use futures::FutureExt;

use crate::error::{FetchError, FetchResult};

type ProducerFn<T> = dyn Fn() -> BoxFuture<'static, FetchResult<T>> + Send + Sync;

/// Type-erased, shareable producer
pub struct Producer<T> {
    call: Arc<ProducerFn<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self { call: Arc::clone(&self.call) }
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Producer<T> {
    /// Wrap a producer function
    ///
    /// Each call of `producer` is one attempt. Panics are caught and
    /// reported as a non-retryable internal error.
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        Self {
            call: Arc::new(move || match panic::catch_unwind(AssertUnwindSafe(&producer)) {
                Ok(attempt) => AssertUnwindSafe(attempt)
                    .catch_unwind()
                    .map(|outcome| outcome.unwrap_or_else(|payload| Err(panicked(payload))))
                    .boxed(),
                Err(payload) => future_util::ready(Err(panicked(payload))).boxed(),
            }),
        }
    }

    /// Start one attempt
    pub fn call(&self) -> BoxFuture<'static, FetchResult<T>> {
        (self.call)()
    }

    /// Race every attempt against `after`; losing resolves to
    /// [`FetchError::Timeout`], which is transient and therefore retried.
    pub fn with_timeout(self, after: Duration) -> Self {
        let inner = self;
        Self {
            call: Arc::new(move || {
                let attempt = inner.call();
                async move {
                    match tokio::time::timeout(after, attempt).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout { after }),
                    }
                }
                .boxed()
            }),
        }
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> FetchError {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    FetchError::Common(CommonError::internal(format!("producer panicked: {}", detail)))
}

/// Wrap a plain producer function with a per-attempt timeout
pub fn with_timeout<T, F, Fut>(producer: F, after: Duration) -> Producer<T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<T>> + Send + 'static,
{
    Producer::new(producer).with_timeout(after)
}
