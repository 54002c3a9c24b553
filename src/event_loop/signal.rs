//! A mutex-protected flag used to wake the event loop from another thread.
//!
//! The TAP/device read path and the socket API both run on the loop's own
//! thread in this crate's intended usage, so most programs never need this.
//! It exists for the case a caller does hand work to a background thread
//! (e.g. a DNS resolver) and needs to nudge a blocked [`EventLoop::run_for`]
//! call to wake up and re-poll once that work completes.

use std::sync::{Condvar, Mutex};

use crate::time::Duration;

/// A single pending/not-pending flag, settable from any thread.
pub struct AsyncSignal {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl AsyncSignal {
    pub fn new() -> Self {
        AsyncSignal {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Mark the signal pending and wake one waiter, if any.
    pub fn set(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = true;
        self.condvar.notify_one();
    }

    /// Clear and return whether the signal was pending.
    pub fn take(&self) -> bool {
        let mut pending = self.pending.lock().unwrap();
        core::mem::replace(&mut *pending, false)
    }

    /// Block until [`set`](Self::set) is called or `timeout` elapses,
    /// consuming the signal either way. Returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap();
        if *pending {
            drop(pending);
            return self.take();
        }
        let (mut pending, _) = self
            .condvar
            .wait_timeout(pending, std::time::Duration::from_millis(timeout.total_millis()))
            .unwrap();
        core::mem::replace(&mut *pending, false)
    }
}

impl Default for AsyncSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_take_reports_pending_once() {
        let sig = AsyncSignal::new();
        sig.set();
        assert!(sig.take());
        assert!(!sig.take());
    }

    #[test]
    fn wait_timeout_returns_false_when_never_set() {
        let sig = AsyncSignal::new();
        assert!(!sig.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wait_timeout_returns_true_when_already_pending() {
        let sig = AsyncSignal::new();
        sig.set();
        assert!(sig.wait_timeout(Duration::from_millis(1000)));
    }

    #[test]
    fn set_from_another_thread_wakes_a_waiter() {
        use std::sync::Arc;
        use std::thread;

        let sig = Arc::new(AsyncSignal::new());
        let sig2 = sig.clone();
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            sig2.set();
        });

        assert!(sig.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
