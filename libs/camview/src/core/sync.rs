// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cancellation shared between the render thread and the receive worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot stop flag that also wakes sleepers.
///
/// Blocking calls on the receive worker poll [`is_stopped`](Self::is_stopped)
/// and sleep through [`wait_timeout`](Self::wait_timeout), so a stop request
/// interrupts them mid-wait instead of after a full poll interval.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`. Returns true if stopped (possibly early).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_stopped() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_stopped()
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_times_out_when_not_stopped() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(!stop.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn stop_wakes_waiter_early() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let waiter = std::thread::spawn(move || {
            let start = Instant::now();
            let stopped = remote.wait_timeout(Duration::from_secs(30));
            (stopped, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        stop.stop();
        let (stopped, waited) = waiter.join().unwrap();
        assert!(stopped);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn already_stopped_returns_immediately() {
        let stop = StopSignal::new();
        stop.stop();
        assert!(stop.wait_timeout(Duration::from_secs(30)));
    }
}
