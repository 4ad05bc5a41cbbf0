//! Live state of one running query, as seen by the coordinator.

use crate::error::{CoordinatorError, Result};
use crate::peaks::PeakMemoryTracker;
use crate::stage::StageHandle;
use chrono::{DateTime, Utc};
use igloo_common::{DataSize, QueryId, StageId};
use igloo_stats::{
    PlanFragment, QueryPhase, QueryStateTimer, QueryStats, RuntimeStats, RuntimeUnit, StageInfo,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Stages, timer and query-level counters of one query.
///
/// Every method takes `&self`; stage reporters, the state machine and the
/// progress reporter share the tracker through an `Arc`.
#[derive(Debug)]
pub struct QueryTracker {
    query_id: QueryId,
    timer: Mutex<QueryStateTimer>,
    stages: RwLock<BTreeMap<StageId, Arc<StageHandle>>>,
    root_stage: Mutex<Option<StageId>>,
    runtime_stats: Mutex<RuntimeStats>,
    peaks: PeakMemoryTracker,
    failure: Mutex<Option<String>>,
}

impl QueryTracker {
    pub fn new(query_id: QueryId, create_time: DateTime<Utc>) -> Self {
        Self {
            query_id,
            timer: Mutex::new(QueryStateTimer::new(create_time)),
            stages: RwLock::new(BTreeMap::new()),
            root_stage: Mutex::new(None),
            runtime_stats: Mutex::new(RuntimeStats::new()),
            peaks: PeakMemoryTracker::new(),
            failure: Mutex::new(None),
        }
    }

    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// Registers a stage, or returns the handle of an already registered one.
    pub fn add_stage(&self, stage_id: StageId, plan: Option<PlanFragment>) -> Arc<StageHandle> {
        let mut stages = self.stages.write();
        Arc::clone(
            stages
                .entry(stage_id)
                .or_insert_with(|| Arc::new(StageHandle::new(stage_id, plan))),
        )
    }

    /// Registers a stage with a complete snapshot, replacing what was
    /// published for it before.
    pub fn upsert_stage(&self, info: StageInfo) -> Arc<StageHandle> {
        let stage_id = info.stage_id();
        let mut stages = self.stages.write();
        match stages.get(&stage_id) {
            Some(handle) => {
                handle.replace(info);
                Arc::clone(handle)
            }
            None => {
                let handle = Arc::new(StageHandle::from_info(info));
                stages.insert(stage_id, Arc::clone(&handle));
                handle
            }
        }
    }

    pub fn stage(&self, stage_id: StageId) -> Result<Arc<StageHandle>> {
        self.stages
            .read()
            .get(&stage_id)
            .cloned()
            .ok_or(CoordinatorError::UnknownStage(stage_id))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.read().len()
    }

    /// Marks a registered stage as the one producing the query's output.
    pub fn set_root_stage(&self, stage_id: StageId) -> Result<()> {
        if !self.stages.read().contains_key(&stage_id) {
            return Err(CoordinatorError::UnknownStage(stage_id));
        }
        *self.root_stage.lock() = Some(stage_id);
        Ok(())
    }

    /// Moves the query into `phase`. Returns whether the transition applied.
    pub fn transition(&self, phase: QueryPhase, now: DateTime<Utc>) -> bool {
        let applied = self.timer.lock().begin(phase, now);
        if applied {
            info!(query_id = %self.query_id, ?phase, "query state changed");
        }
        applied
    }

    pub fn record_heartbeat(&self, now: DateTime<Utc>) {
        self.timer.lock().record_heartbeat(now);
    }

    pub fn record_node_memory(&self, total: DataSize) {
        self.peaks.record_node_memory(total);
    }

    pub fn record_task_memory(&self, user: DataSize, total: DataSize) {
        self.peaks.record_task_memory(user, total);
    }

    pub fn peaks(&self) -> &PeakMemoryTracker {
        &self.peaks
    }

    /// Records a query-level runtime metric. Values whose unit conflicts
    /// with what was recorded before are dropped.
    pub fn record_runtime_metric(&self, name: &str, unit: RuntimeUnit, value: i64) {
        if let Err(e) = self.runtime_stats.lock().add_metric_value(name, unit, value) {
            warn!(query_id = %self.query_id, error = %e, "dropping runtime metric");
        }
    }

    /// Merges a batch of query-level metrics with the same conflict rule as
    /// [`record_runtime_metric`](Self::record_runtime_metric).
    pub fn merge_runtime_stats(&self, runtime_stats: &RuntimeStats) {
        if let Err(e) = self.runtime_stats.lock().merge(runtime_stats) {
            warn!(query_id = %self.query_id, error = %e, "dropping runtime metric");
        }
    }

    /// Ends the query successfully.
    pub fn finish(&self, now: DateTime<Utc>) {
        let mut timer = self.timer.lock();
        timer.begin(QueryPhase::Finishing, now);
        timer.end(now);
        info!(query_id = %self.query_id, "query finished");
    }

    /// Ends the query with a failure. Only the first reason is kept.
    pub fn fail(&self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        warn!(query_id = %self.query_id, %reason, "query failed");
        self.failure.lock().get_or_insert(reason);
        self.timer.lock().end(now);
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn is_done(&self) -> bool {
        self.timer.lock().is_ended()
    }

    /// Aggregates the current statistics of the query.
    ///
    /// Each stage is read once. Stages that publish concurrently may be seen
    /// at slightly different instants.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Result<QueryStats> {
        let stages: Vec<Arc<StageInfo>> = self
            .stages
            .read()
            .values()
            .map(|handle| handle.snapshot())
            .collect();

        if stages.is_empty() && self.failure.lock().is_some() {
            let failed_at = self.timer.lock().end_time().unwrap_or(now);
            return Ok(QueryStats::immediate_failure_at(failed_at)?);
        }

        self.record_current_usage(&stages);

        let root_id = *self.root_stage.lock();
        let root = root_id.and_then(|id| stages.iter().find(|stage| stage.stage_id() == id));
        let timer = self.timer.lock().clone();
        let runtime_stats = self.runtime_stats.lock().clone();

        let stats = QueryStats::aggregate(
            &timer,
            root.map(Arc::as_ref),
            stages.iter().map(Arc::as_ref),
            &self.peaks.peaks(),
            &runtime_stats,
            now,
        )?;
        Ok(stats)
    }

    fn record_current_usage(&self, stages: &[Arc<StageInfo>]) {
        let (running_tasks, user, total) = stages.iter().fold(
            (0u32, DataSize::ZERO, DataSize::ZERO),
            |(running_tasks, user, total), stage| {
                let stats = stage.latest_attempt().stats();
                (
                    running_tasks.saturating_add(stats.running_tasks),
                    user.saturating_add(stats.user_memory_reservation),
                    total.saturating_add(stats.total_memory_reservation),
                )
            },
        );
        self.peaks.record_running_tasks(running_tasks);
        self.peaks.record_query_memory(user, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igloo_stats::{StageExecutionState, StageExecutionStats};

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    #[test]
    fn test_unknown_stage() {
        let tracker = QueryTracker::new(QueryId::from("q1"), at(0));
        assert!(matches!(
            tracker.stage(StageId(9)),
            Err(CoordinatorError::UnknownStage(StageId(9)))
        ));
        assert!(tracker.set_root_stage(StageId(9)).is_err());
    }

    #[test]
    fn test_add_stage_is_idempotent() {
        let tracker = QueryTracker::new(QueryId::from("q1"), at(0));
        let first = tracker.add_stage(StageId(1), None);
        let second = tracker.add_stage(StageId(1), None);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tracker.stage_count(), 1);
    }

    #[test]
    fn test_failure_before_any_stage_is_immediate_failure() {
        let tracker = QueryTracker::new(QueryId::from("q1"), at(0));
        tracker.fail("syntax error", at(5));
        tracker.fail("ignored", at(6));

        let stats = tracker.snapshot(at(10)).unwrap();
        assert_eq!(tracker.failure().as_deref(), Some("syntax error"));
        assert_eq!(stats.timeline().create_time, at(5).timestamp_millis());
        assert_eq!(stats.timeline().end_time, Some(at(5).timestamp_millis()));
        assert!(!stats.is_scheduled());
    }

    #[test]
    fn test_failed_query_snapshot_is_stable_across_polls() {
        let tracker = QueryTracker::new(QueryId::from("q1"), at(0));
        tracker.fail("boom", at(5));

        let first = tracker.snapshot(at(10)).unwrap();
        let second = tracker.snapshot(at(20)).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.timeline().end_time, Some(at(5).timestamp_millis()));
    }

    #[test]
    fn test_snapshot_tracks_peaks_from_published_stages() {
        let tracker = QueryTracker::new(QueryId::from("q1"), at(0));
        let root = tracker.add_stage(StageId(0), None);
        tracker.set_root_stage(StageId(0)).unwrap();
        let publish = |running_tasks, reserved| {
            root.publish(
                StageExecutionState::Running,
                StageExecutionStats {
                    running_tasks,
                    user_memory_reservation: DataSize::from_bytes(reserved),
                    total_memory_reservation: DataSize::from_bytes(reserved),
                    ..Default::default()
                },
            )
        };

        publish(6, 4096);
        tracker.snapshot(at(10)).unwrap();
        publish(2, 1024);
        let stats = tracker.snapshot(at(20)).unwrap();

        assert_eq!(stats.tasks().running, 2);
        assert_eq!(stats.tasks().peak_running, 6);
        assert_eq!(stats.memory().user_memory_reservation, DataSize::from_bytes(1024));
        assert_eq!(
            stats.memory().peak_user_memory_reservation,
            DataSize::from_bytes(4096)
        );
        assert!(stats.is_scheduled());
    }

    #[test]
    fn test_runtime_metric_conflicts_keep_first_unit() {
        let tracker = QueryTracker::new(QueryId::from("q1"), at(0));
        tracker.add_stage(StageId(0), None);
        tracker.set_root_stage(StageId(0)).unwrap();
        tracker.record_runtime_metric("planningNanos", RuntimeUnit::Nano, 10);
        tracker.record_runtime_metric("planningNanos", RuntimeUnit::Byte, 10);
        tracker.record_runtime_metric("planningNanos", RuntimeUnit::Nano, 30);

        let stats = tracker.snapshot(at(1)).unwrap();
        let metric = stats.runtime_stats().get("planningNanos").unwrap();
        assert_eq!((metric.unit, metric.sum, metric.count), (RuntimeUnit::Nano, 40, 2));
    }

    #[test]
    fn test_finish_ends_timer() {
        let tracker = QueryTracker::new(QueryId::from("q1"), at(0));
        assert!(tracker.transition(QueryPhase::Running, at(10)));
        tracker.finish(at(50));
        assert!(tracker.is_done());
        assert!(!tracker.transition(QueryPhase::Finishing, at(60)));

        tracker.add_stage(StageId(0), None);
        let stats = tracker.snapshot(at(500)).unwrap();
        assert_eq!(stats.phases().elapsed.round_to_millis(), 50);
        assert_eq!(stats.phases().finishing.round_to_millis(), 0);
    }
}
