//! ## Counting semaphore
//!
//! The async write/read-ahead engine bounds the number of URBs it keeps in
//! flight at once, the same way the original driver uses a kernel
//! `struct semaphore` to throttle `usbtmc_ioctl_generic_write`. `std` has no
//! counting semaphore, so this hand-rolls one from a `Mutex` + `Condvar`,
//! following the same lock-and-wait style the rest of this crate uses for
//! its other shared state.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct Semaphore {
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Semaphore {
        Semaphore {
            permits: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.condvar.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    /// Takes a permit if one is immediately available, without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock().unwrap();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Blocks until a permit is available or `timeout` elapses, returning
    /// whether a permit was acquired.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self
                .condvar
                .wait_timeout(permits, deadline - now)
                .unwrap();
            permits = guard;
            if result.timed_out() && *permits == 0 {
                return false;
            }
        }
        *permits -= 1;
        true
    }

    /// Returns a permit to the pool and wakes one waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_acquire_respects_capacity() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn acquire_timeout_fails_when_exhausted() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.acquire_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn release_wakes_blocked_acquirer() {
        let sem = Arc::new(Semaphore::new(1));
        sem.acquire();

        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            sem2.acquire();
        });

        thread::sleep(Duration::from_millis(20));
        sem.release();
        handle.join().unwrap();
    }
}
