//! Tracks detached background work (republish, best-effort status writes) so
//! shutdown can wait for it to drain within the graceful window instead of
//! abandoning it mid-flight (§5; §9 "detached background sends -> bounded
//! fire-and-forget tasks tracked for drain at shutdown"). Grounded on the
//! teacher's `shutdown_signal` in `main.rs`, which drains its batch queue
//! (`state.queue.pending_count()` / `force_flush()`) before returning — the
//! same "check what's outstanding, wait for it" shape, generalized here from
//! a single queue to an arbitrary set of spawned futures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Spawns `fut` as a detached task and registers it for drain.
    pub async fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.inner.lock().await;
        set.spawn(fut);
    }

    /// Waits for every registered task to finish, up to `timeout`. Tasks
    /// still running once `timeout` elapses are left to finish or be
    /// dropped with the process; this is the 185s graceful window from §5.
    pub async fn drain(&self, timeout: Duration) {
        let mut set = self.inner.lock().await;
        if set.is_empty() {
            return;
        }
        let outcome = tokio::time::timeout(timeout, async {
            while set.join_next().await.is_some() {}
        })
        .await;
        if outcome.is_err() {
            warn!(
                remaining = set.len(),
                "graceful shutdown window elapsed with background tasks still running"
            );
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
