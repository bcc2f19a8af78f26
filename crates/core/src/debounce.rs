//! Debounce Gate
//!
//! Coalesces bursts of triggers per channel: every `schedule` call replaces
//! the channel's armed trigger, so only the last one of a burst fires, once,
//! `delay` after it was scheduled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arlm_common::time::{schedule, TimerHandle};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug)]
struct Armed {
    sequence: u64,
    timer: TimerHandle,
}

#[derive(Debug, Default)]
struct Channels {
    armed: HashMap<String, Armed>,
    next_sequence: u64,
}

/// Per-channel trailing-edge debouncer
#[derive(Debug, Clone, Default)]
pub struct DebounceGate {
    channels: Arc<Mutex<Channels>>,
}

impl DebounceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `trigger` for `channel`, replacing whatever was armed there
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, channel: impl Into<String>, delay: Duration, trigger: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let channel = channel.into();
        let mut channels = self.channels.lock();
        channels.next_sequence += 1;
        let sequence = channels.next_sequence;

        let gate = Arc::clone(&self.channels);
        let fired_channel = channel.clone();
        let timer = schedule(delay, move || {
            // A replacement armed after this timer began firing wins.
            let current = {
                let mut channels = gate.lock();
                match channels.armed.get(&fired_channel) {
                    Some(armed) if armed.sequence == sequence => {
                        channels.armed.remove(&fired_channel);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                debug!("Debounced trigger fired for channel '{}'", fired_channel);
                trigger();
            }
        });

        if let Some(previous) = channels.armed.insert(channel, Armed { sequence, timer }) {
            previous.timer.cancel();
        }
    }

    /// Disarm `channel`; returns whether a trigger was armed
    pub fn cancel(&self, channel: &str) -> bool {
        match self.channels.lock().armed.remove(channel) {
            Some(armed) => {
                armed.timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Channels with an armed trigger, sorted
    pub fn pending_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.lock().armed.keys().cloned().collect();
        channels.sort();
        channels
    }
}
