//! Pending host operation tracking.
//!
//! Every async op the bridge starts on behalf of a script (fetch, body
//! reads, timers) is registered here for as long as it is in flight. The
//! executor keeps the VM alive until the active set has been observed empty
//! for several consecutive rounds, which lets follow-up work that a
//! continuation schedules (a `.json()` after a `fetch`) register before the
//! run is considered finished.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

/// How the tracker decides the bridge has gone quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    /// Consecutive empty observations required before draining completes.
    pub idle_rounds: u32,
    /// Delay between observations.
    pub poll_interval: Duration,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            idle_rounds: 3,
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Default)]
struct TrackerInner {
    next_id: Cell<u64>,
    total: Cell<u64>,
    active: RefCell<HashSet<u64>>,
}

/// Set of in-flight host operations for one run.
///
/// Cloning is cheap and every clone observes the same set. The tracker lives
/// on the isolate's thread and is deliberately `!Send`.
#[derive(Clone, Default)]
pub struct PendingOperationTracker {
    inner: Rc<TrackerInner>,
}

/// Keeps an operation registered until dropped.
pub struct OperationGuard {
    id: u64,
    inner: Rc<TrackerInner>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.inner.active.borrow_mut().remove(&self.id);
    }
}

impl PendingOperationTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation now. It stays active until the guard drops.
    pub fn register(&self, label: &'static str) -> OperationGuard {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.total.set(self.inner.total.get() + 1);
        self.inner.active.borrow_mut().insert(id);
        tracing::trace!(op = label, id, "host operation registered");
        OperationGuard {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Wrap `fut` so it counts as active from this call until it completes
    /// or is dropped. The output is passed through untouched.
    pub fn track<F>(&self, label: &'static str, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let guard = self.register(label);
        async move {
            let out = fut.await;
            drop(guard);
            out
        }
    }

    /// Number of operations currently in flight.
    pub fn active(&self) -> usize {
        self.inner.active.borrow().len()
    }

    /// Number of operations ever registered.
    pub fn total_tracked(&self) -> u64 {
        self.inner.total.get()
    }

    /// Whether nothing is in flight right now.
    pub fn is_idle(&self) -> bool {
        self.inner.active.borrow().is_empty()
    }

    /// Resolve once the active set has been empty for `policy.idle_rounds`
    /// consecutive observations. A busy observation resets the count. There
    /// is no deadline here; bounding the wait is the caller's concern.
    pub fn await_drain(&self, policy: DrainPolicy) -> impl Future<Output = ()> + 'static {
        let tracker = self.clone();
        async move {
            let mut idle = 0;
            loop {
                if tracker.is_idle() {
                    idle += 1;
                    if idle >= policy.idle_rounds {
                        return;
                    }
                } else {
                    idle = 0;
                }
                tokio::time::sleep(policy.poll_interval).await;
            }
        }
    }
}
