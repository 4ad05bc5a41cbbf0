//! Periodic progress snapshots of a running query.

use crate::error::{CoordinatorError, Result};
use crate::tracker::QueryTracker;
use chrono::Utc;
use igloo_stats::QueryStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub type SnapshotReceiver = watch::Receiver<Option<Arc<QueryStats>>>;

/// Background task that snapshots a [`QueryTracker`] every poll interval
/// and publishes the result to subscribers.
///
/// The task stops after publishing the snapshot taken once the query has
/// ended, or when shutdown is signalled.
pub struct ProgressReporter {
    updates: SnapshotReceiver,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(
        tracker: Arc<QueryTracker>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let (updates_tx, updates) = watch::channel(None);
        let handle = tokio::spawn(run(tracker, interval, updates_tx, shutdown_rx));
        Self { updates, handle }
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.updates.clone()
    }

    pub fn latest(&self) -> Option<Arc<QueryStats>> {
        self.updates.borrow().clone()
    }

    /// Waits for the task to stop and returns the last published snapshot.
    pub async fn join(self) -> Result<Option<Arc<QueryStats>>> {
        self.handle
            .await
            .map_err(|e| CoordinatorError::Internal(format!("progress reporter failed: {e}")))?;
        let latest = self.updates.borrow().clone();
        Ok(latest)
    }
}

async fn run(
    tracker: Arc<QueryTracker>,
    interval: Duration,
    updates_tx: watch::Sender<Option<Arc<QueryStats>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!(query_id = %tracker.query_id(), "progress reporter shutting down");
                    return;
                }
            }
            _ = ticker.tick() => {
                // read before snapshotting so the final snapshot is still published
                let done = tracker.is_done();
                match tracker.snapshot(Utc::now()) {
                    Ok(stats) => {
                        log_progress(&tracker, &stats);
                        updates_tx.send_replace(Some(Arc::new(stats)));
                    }
                    Err(e) => {
                        warn!(query_id = %tracker.query_id(), error = %e, "keeping previous snapshot");
                    }
                }
                if done {
                    return;
                }
            }
        }
    }
}

fn log_progress(tracker: &QueryTracker, stats: &QueryStats) {
    let drivers = stats.drivers();
    info!(
        query_id = %tracker.query_id(),
        progress = ?stats.progress_percentage(),
        completed_drivers = drivers.completed,
        total_drivers = drivers.total,
        running_drivers = drivers.running,
        fully_blocked = stats.is_fully_blocked(),
        blocked_reasons = ?stats.blocked_reasons(),
        "query progress"
    );
}
