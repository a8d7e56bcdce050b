// This file is part of BLSAgg.
//
// BLSAgg is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// BLSAgg is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with BLSAgg.
// If not, see https://www.gnu.org/licenses/.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::sync::Notify;
use tracing::{debug, warn};

/// Explicitly tracked collection of background tasks.
///
/// Tasks spawned here are counted so shutdown can drain them; task errors
/// are logged and contained rather than propagated into the scheduler. Once
/// draining starts, new spawns are dropped. Clones share the same tracker.
#[derive(Clone, Debug, Default)]
pub struct TaskTracker {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    active: AtomicUsize,
    stopping: AtomicBool,
    settled: Notify,
}

struct TaskGuard(Arc<Inner>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        // runs on panic unwind too, so a crashed task never wedges drain
        self.0.active.fetch_sub(1, Ordering::AcqRel);
        self.0.settled.notify_waiters();
    }
}

impl TaskTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` on the runtime, tracked. Dropped silently if the tracker is
    /// draining.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.inner.stopping.load(Ordering::Acquire) {
            debug!("Dropping task {name:?} scheduled during shutdown");
            return;
        }
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        let guard = TaskGuard(Arc::clone(&self.inner));
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(error) = fut.await {
                warn!("Background task {name:?} failed: {error:#}");
            }
        });
    }

    /// Stop accepting tasks and wait for the active ones to finish.
    pub async fn drain(&self) {
        self.inner.stopping.store(true, Ordering::Release);
        loop {
            let settled = self.inner.settled.notified();
            if self.inner.active.load(Ordering::Acquire) == 0 {
                return;
            }
            settled.await;
        }
    }

    /// Number of tasks currently running.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn drain_waits_for_active_tasks() {
        let tracker = TaskTracker::new();
        let (tx, rx) = oneshot::channel::<()>();
        tracker.spawn("held", async move {
            let _ = rx.await;
            Ok(())
        });
        assert_eq!(tracker.active(), 1);

        let drainer = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!drainer.is_finished());

        tx.send(()).unwrap();
        drainer.await.unwrap();
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn spawns_after_drain_are_dropped() {
        let tracker = TaskTracker::new();
        tracker.drain().await;
        tracker.spawn("late", async { Ok(()) });
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn task_errors_are_contained() {
        let tracker = TaskTracker::new();
        tracker.spawn("failing", async { Err(anyhow::anyhow!("boom")) });
        tracker.drain().await;
        assert_eq!(tracker.active(), 0);
    }
}
