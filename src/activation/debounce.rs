//! Cancel-and-replace debounce timer.
//!
//! Switching repositories fires one selection event for the repository losing
//! selection and one for the repository gaining it. Every event reschedules a
//! single timer, so a burst collapses into one resolution that runs after the
//! burst has been quiet for the debounce delay.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

enum TimerState {
    Idle,
    Pending(JoinHandle<()>),
    Closed,
}

/// A single cancellable timer.
pub struct Debouncer {
    delay: Duration,
    state: Mutex<TimerState>,
}

impl Debouncer {
    /// Idle debouncer firing `delay` after the last schedule.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Mutex::new(TimerState::Idle),
        }
    }

    /// The debounce delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel any pending timer and schedule `fire` after the delay.
    ///
    /// Returns `false` once the debouncer is closed. `fire` runs without
    /// suspending, so a firing timer is never interrupted halfway.
    pub fn schedule<F>(&self, fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        match &*state {
            TimerState::Closed => return false,
            TimerState::Pending(handle) => handle.abort(),
            TimerState::Idle => {}
        }

        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        *state = TimerState::Pending(handle);
        true
    }

    /// Cancel the pending timer, if any. Returns whether one was cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, TimerState::Idle) {
            TimerState::Pending(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            TimerState::Closed => {
                *state = TimerState::Closed;
                false
            }
            TimerState::Idle => false,
        }
    }

    /// Cancel the pending timer and refuse any further scheduling.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let TimerState::Pending(handle) = std::mem::replace(&mut *state, TimerState::Closed) {
            handle.abort();
        }
    }

    /// Whether a timer is scheduled and has not fired yet.
    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.lock(), TimerState::Pending(handle) if !handle.is_finished())
    }

    /// Whether [`Debouncer::close`] has been called.
    pub fn is_closed(&self) -> bool {
        matches!(&*self.state.lock(), TimerState::Closed)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let TimerState::Pending(handle) = &*self.state.get_mut() {
            handle.abort();
        }
    }
}
