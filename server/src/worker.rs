//! Counted set of live background workers
//!
//! Every dispatch loop (and the connection monitor) holds a `WorkerGuard`
//! for as long as it may touch the transport. Shutdown blocks on the count
//! reaching zero instead of sleeping and hoping.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct WorkerTracker {
    live: Mutex<usize>,
    idle: Condvar,
}

impl WorkerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one more live worker until the returned guard is dropped.
    pub fn enter(self: &Arc<Self>) -> WorkerGuard {
        *self.live.lock() += 1;
        WorkerGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn live(&self) -> usize {
        *self.live.lock()
    }

    /// Waits until no workers remain
    ///
    /// Returns `true` once the count is zero, `false` if `timeout` elapsed
    /// first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut live = self.live.lock();
        let result = self.idle.wait_while_for(&mut live, |live| *live > 0, timeout);
        !result.timed_out() || *live == 0
    }

    fn leave(&self) {
        let mut live = self.live.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.idle.notify_all();
        }
    }
}

/// Keeps its worker counted. Dropping it (including during a panic unwind)
/// releases the slot.
#[derive(Debug)]
pub struct WorkerGuard {
    tracker: Arc<WorkerTracker>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.tracker.leave();
    }
}
