//! In-flight publish tracking for graceful shutdown
//!
//! Every publish task holds an [`InFlightGuard`] for as long as it runs. The
//! guard decrements the counter on drop, so a task that returns early, fails,
//! or panics still completes its registration. At shutdown the process calls
//! [`InFlightTracker::drain`] and waits for the counter to reach zero.
//!
//! ```text
//! register() ──▶ count += 1 ──▶ task runs ──▶ guard dropped ──▶ count -= 1
//!                                                                  │
//!                                                      count == 0? ▼
//!                                                          notify drainers
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    zero: Notify,
}

/// Process-wide counter of outstanding publish tasks.
///
/// Cloning is cheap and every clone observes the same counter.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    inner: Arc<Inner>,
}

/// One registered unit of work. Dropping it marks the unit complete.
#[derive(Debug)]
#[must_use = "dropping the guard immediately completes the unit of work"]
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlightTracker {
    /// Create a tracker with no outstanding work
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one new outstanding unit of work.
    ///
    /// Call this before spawning the task that must be awaited at shutdown.
    pub fn register(&self) -> InFlightGuard {
        let now = self.inner.count.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("hook_delivery_in_flight").set(now as f64);
        InFlightGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Record that a previously registered unit of work has finished.
    pub fn complete(&self, guard: InFlightGuard) {
        drop(guard);
    }

    /// Number of registered units that have not completed yet
    pub fn in_flight(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Run `task` on the tokio runtime as one tracked unit of work.
    ///
    /// Registration happens before this returns, so a `drain` started after
    /// `spawn` always waits for `task`.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.register();
        tokio::spawn(async move {
            let _guard = guard;
            task.await
        })
    }

    /// Wait until every registered unit of work has completed.
    ///
    /// Has no deadline of its own; wrap it in `tokio::time::timeout` to bound
    /// the wait.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.zero.notified();
            tokio::pin!(notified);
            // Register interest before checking so a wakeup between the load
            // and the await is not lost.
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let prev = self.inner.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "in-flight counter underflow");
        metrics::gauge!("hook_delivery_in_flight").set(prev.saturating_sub(1) as f64);
        if prev == 1 {
            self.inner.zero.notify_waiters();
        }
    }
}
