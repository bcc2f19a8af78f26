//! One-shot timers with cancellation support
//!
//! A timer runs its callback once after a delay unless its [`TimerHandle`]
//! is cancelled first. The debounce gate is built on these.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::sleep;

/// A timer handle that can be used to cancel a timer
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
    task: Arc<Mutex<Option<AbortHandle>>>,
}

impl TimerHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            fired: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Cancel the timer
    ///
    /// Has no effect once the callback started running.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            if !self.has_fired() {
                task.abort();
            }
        }
    }

    /// Check if the timer has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check if the callback has run
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Run `callback` once after `delay` unless the returned handle is cancelled
///
/// Must be called from within a tokio runtime.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use arlm_common::time::timer::schedule;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = schedule(Duration::from_millis(200), || println!("fired"));
///     handle.cancel();
/// }
/// ```
pub fn schedule<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let handle = TimerHandle::new();
    let task_handle = handle.clone();

    let task = tokio::spawn(async move {
        sleep(delay).await;
        if !task_handle.is_cancelled() {
            task_handle.fired.store(true, Ordering::SeqCst);
            callback();
        }
    });

    *handle.task.lock() = Some(task.abort_handle());
    handle
}
