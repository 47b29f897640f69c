//! One-shot countdown latch.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Releases waiters once it has been counted down `count` times.
///
/// Counting down below zero has no effect.
#[derive(Debug)]
pub struct CountDownLatch {
    remaining: AtomicUsize,
    released: Notify,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(count),
            released: Notify::new(),
        })
    }

    /// Decrements the count and releases waiters when it reaches zero.
    pub fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            });

        if previous == Ok(1) {
            self.released.notify_waiters();
        }
    }

    /// Returns the remaining count.
    pub fn count(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Waits until the count reaches zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.released.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Returns a guard that counts down when dropped.
    pub fn guard(self: &Arc<Self>) -> LatchGuard {
        LatchGuard {
            latch: self.clone(),
        }
    }
}

/// Counts its latch down on drop, so a worker counts down on every exit path, panics included.
#[derive(Debug)]
pub struct LatchGuard {
    latch: Arc<CountDownLatch>,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.latch.count_down();
    }
}
