//! ## Per-handle state
//!
//! One `HandleState` per open client handle, tracking the latched SRQ/status
//! byte and whether the underlying device has gone away. Grounded on
//! `examples/original_source/usbtmc.c`'s `usbtmc_file_data` (one per `open()`
//! call) and shaped like `examples/esarver-rusb-usbtmc/src/handle.rs`'s
//! per-handle facade.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Tracks latched SRQ state and liveness for one open handle. Shared via
/// `Arc` between the owning [`crate::client::UsbtmcClient`] and the
/// interrupt dispatcher thread, which holds only a `Weak` reference so a
/// dropped client doesn't get kept alive by the dispatcher's handle list.
pub struct HandleState {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

struct Inner {
    srq_asserted: bool,
    last_status_byte: u8,
    zombie: bool,
}

impl HandleState {
    pub fn new() -> HandleState {
        HandleState {
            inner: Mutex::new(Inner {
                srq_asserted: false,
                last_status_byte: 0,
                zombie: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Latches an SRQ event observed by the interrupt dispatcher.
    pub fn latch_srq(&self, status_byte: u8) {
        let mut inner = self.inner.lock().unwrap();
        inner.srq_asserted = true;
        inner.last_status_byte = status_byte;
        self.condvar.notify_all();
    }

    /// Clears the latched SRQ flag, returning whether it had been set.
    pub fn clear_srq(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let was_set = inner.srq_asserted;
        inner.srq_asserted = false;
        was_set
    }

    /// Atomically takes the latched status byte, if an SRQ is currently
    /// asserted, clearing the latch. Used by `READ_STATUS_BYTE` to prefer a
    /// status byte this handle already observed over issuing a fresh
    /// control request.
    pub fn take_latched_status(&self) -> Option<u8> {
        let mut inner = self.inner.lock().unwrap();
        if inner.srq_asserted {
            inner.srq_asserted = false;
            Some(inner.last_status_byte)
        } else {
            None
        }
    }

    pub fn srq_asserted(&self) -> bool {
        self.inner.lock().unwrap().srq_asserted
    }

    pub fn last_status_byte(&self) -> u8 {
        self.inner.lock().unwrap().last_status_byte
    }

    /// Blocks until an SRQ is latched or `timeout` elapses, returning
    /// whether one was observed (and clearing it if so). Mirrors
    /// `usbtmc488_ioctl_wait_srq`.
    pub fn wait_srq(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let deadline = Instant::now() + timeout;

        while !inner.srq_asserted && !inner.zombie {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.condvar.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
            if result.timed_out() && !inner.srq_asserted {
                return false;
            }
        }

        if inner.srq_asserted {
            inner.srq_asserted = false;
            true
        } else {
            false
        }
    }

    /// Marks this handle's device as gone, waking any `wait_srq` caller.
    pub fn mark_zombie(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.zombie = true;
        self.condvar.notify_all();
    }

    pub fn is_zombie(&self) -> bool {
        self.inner.lock().unwrap().zombie
    }
}

impl Default for HandleState {
    fn default() -> Self {
        HandleState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_srq_returns_true_once_latched() {
        let state = Arc::new(HandleState::new());
        let state2 = Arc::clone(&state);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            state2.latch_srq(0x42);
        });

        assert!(state.wait_srq(Duration::from_millis(500)));
        assert_eq!(state.last_status_byte(), 0x42);
        handle.join().unwrap();
    }

    #[test]
    fn wait_srq_times_out_without_latch() {
        let state = HandleState::new();
        assert!(!state.wait_srq(Duration::from_millis(20)));
    }

    #[test]
    fn mark_zombie_wakes_waiter_without_asserting_srq() {
        let state = Arc::new(HandleState::new());
        let state2 = Arc::clone(&state);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            state2.mark_zombie();
        });

        assert!(!state.wait_srq(Duration::from_millis(500)));
        assert!(state.is_zombie());
        handle.join().unwrap();
    }
}
