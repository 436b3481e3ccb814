//! Exclusive render access for full-stack composites.
//!
//! One `RenderLock` is shared by every caller of a sequencer. Holding a
//! `RenderToken` is the proof of exclusive access the stack compositor
//! requires. Foreground requests take priority: background (prefetch)
//! acquisition waits while any foreground caller is queued, and gives up
//! when its cancel flag is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::trace;

/// Poll interval of cancellable waits.
const CANCEL_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    /// Foreground callers waiting for the lock
    foreground_waiting: usize,
}

#[derive(Debug, Default)]
pub struct RenderLock {
    state: Mutex<LockState>,
    released: Condvar,
}

/// Exclusive access; released on drop.
#[derive(Debug)]
pub struct RenderToken<'a> {
    lock: &'a RenderLock,
    background: bool,
}

impl RenderToken<'_> {
    pub fn is_background(&self) -> bool {
        self.background
    }
}

impl RenderLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Foreground acquisition; blocks until the lock is free.
    pub fn lock(&self) -> RenderToken<'_> {
        let mut state = self.state();
        state.foreground_waiting += 1;
        while state.held {
            state = self.released.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.foreground_waiting -= 1;
        state.held = true;
        RenderToken { lock: self, background: false }
    }

    /// Background acquisition: yields to queued foreground callers.
    /// Returns `None` once `cancel` is set.
    pub fn lock_background(&self, cancel: &AtomicBool) -> Option<RenderToken<'_>> {
        let mut state = self.state();
        while state.held || state.foreground_waiting > 0 {
            if cancel.load(Ordering::Relaxed) {
                trace!("Background render lock wait cancelled");
                return None;
            }
            state = self
                .released
                .wait_timeout(state, CANCEL_POLL)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        state.held = true;
        Some(RenderToken { lock: self, background: true })
    }

    /// Non-blocking foreground attempt.
    pub fn try_lock(&self) -> Option<RenderToken<'_>> {
        let mut state = self.state();
        if state.held {
            return None;
        }
        state.held = true;
        Some(RenderToken { lock: self, background: false })
    }

    pub fn is_locked(&self) -> bool {
        self.state().held
    }
}

impl Drop for RenderToken<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state();
        state.held = false;
        drop(state);
        self.lock.released.notify_all();
    }
}
