//! Cancellable single-shot timer for debounced input.
//!
//! The timer holds at most one pending value. Scheduling again replaces the
//! value and restarts the quiet window, so a burst of inputs fires once with
//! the last value. Time is passed in explicitly; the owner decides when to
//! poll.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Pending<T> {
    value: T,
    due: Instant,
}

#[derive(Debug, Clone)]
pub struct DebounceTimer<T> {
    window: Duration,
    pending: Option<Pending<T>>,
}

impl<T> DebounceTimer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Cancels any pending value and arms the timer for `value`.
    ///
    /// Returns `true` when a pending value was replaced.
    pub fn schedule(&mut self, value: T, now: Instant) -> bool {
        self.pending
            .replace(Pending {
                value,
                due: now + self.window,
            })
            .is_some()
    }

    /// Disarms the timer, returning the value that would have fired.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|pending| pending.value)
    }

    /// Fires when the quiet window has elapsed at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let elapsed = self
            .pending
            .as_ref()
            .is_some_and(|pending| now >= pending.due);
        if elapsed {
            self.cancel()
        } else {
            None
        }
    }

    /// Fires immediately regardless of the window.
    pub fn flush(&mut self) -> Option<T> {
        self.cancel()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_value(&self) -> Option<&T> {
        self.pending.as_ref().map(|pending| &pending.value)
    }

    pub fn due_at(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.due)
    }

    /// How long a run loop may sleep before polling again.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.due_at().map(|due| due.saturating_duration_since(now))
    }
}
