//! Per-stage publication cells.
//!
//! Each stage reporter owns the write side of a [`StageHandle`]; readers take
//! a snapshot, which is a single `Arc` clone. Updates build a complete new
//! [`StageInfo`] and swap it in, so a snapshot is always one whole published
//! value.

use igloo_common::StageId;
use igloo_stats::{
    PlanFragment, StageExecutionInfo, StageExecutionState, StageExecutionStats, StageInfo,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct StageHandle {
    stage_id: StageId,
    info: RwLock<Arc<StageInfo>>,
}

impl StageHandle {
    /// A fresh stage on its first, planned attempt.
    pub fn new(stage_id: StageId, plan: Option<PlanFragment>) -> Self {
        Self::from_info(StageInfo::new(
            stage_id,
            plan,
            StageExecutionInfo::default(),
        ))
    }

    pub fn from_info(info: StageInfo) -> Self {
        Self {
            stage_id: info.stage_id(),
            info: RwLock::new(Arc::new(info)),
        }
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn snapshot(&self) -> Arc<StageInfo> {
        Arc::clone(&*self.info.read())
    }

    /// Publishes the latest state and counters of the current attempt.
    pub fn publish(&self, state: StageExecutionState, stats: StageExecutionStats) {
        debug!(stage_id = %self.stage_id, ?state, "publishing stage stats");
        self.update(|info| info.with_latest_attempt(StageExecutionInfo::new(state, stats)));
    }

    /// Abandons the current attempt and starts a new one.
    pub fn retry(&self) {
        warn!(stage_id = %self.stage_id, "retrying stage");
        self.update(StageInfo::retried);
    }

    pub fn set_plan(&self, plan: PlanFragment) {
        self.update(|info| info.with_plan(plan));
    }

    /// Replaces the whole published value. The stage id must not change.
    pub fn replace(&self, info: StageInfo) {
        debug_assert_eq!(info.stage_id(), self.stage_id);
        *self.info.write() = Arc::new(info);
    }

    fn update(&self, f: impl FnOnce(&StageInfo) -> StageInfo) {
        let mut guard = self.info.write();
        let next = f(&guard);
        *guard = Arc::new(next);
    }
}
