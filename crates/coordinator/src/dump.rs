//! Offline query dumps: everything needed to rebuild a query's statistics.

use crate::error::{CoordinatorError, Result};
use crate::tracker::QueryTracker;
use chrono::{DateTime, Utc};
use igloo_common::{QueryId, StageId};
use igloo_stats::{PeakMemory, QueryPhase, QueryStateTimer, QueryStats, RuntimeStats, StageInfo};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStart {
    pub phase: QueryPhase,
    pub at: DateTime<Utc>,
}

/// The published stage snapshots of one query, plus the query-level facts
/// the aggregator cannot derive from stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDump {
    pub query_id: QueryId,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub phases: Vec<PhaseStart>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub root_stage_id: Option<StageId>,
    #[serde(default)]
    pub stages: Vec<StageInfo>,
    #[serde(default)]
    pub peak_memory: PeakMemory,
    #[serde(default)]
    pub runtime_stats: RuntimeStats,
}

impl QueryDump {
    pub fn timer(&self) -> QueryStateTimer {
        let mut timer = QueryStateTimer::new(self.create_time);
        for start in &self.phases {
            timer.begin(start.phase, start.at);
        }
        if let Some(end_time) = self.end_time {
            timer.end(end_time);
        }
        timer
    }

    pub fn root_stage(&self) -> Result<Option<&StageInfo>> {
        self.root_stage_id
            .map(|root_id| {
                self.stages
                    .iter()
                    .find(|stage| stage.stage_id() == root_id)
                    .ok_or(CoordinatorError::UnknownStage(root_id))
            })
            .transpose()
    }

    /// Aggregates the dump as of `now`; open phases are measured up to it.
    pub fn aggregate(&self, now: DateTime<Utc>) -> Result<QueryStats> {
        if self.stages.is_empty() && self.failure.is_some() {
            let failed_at = self.end_time.unwrap_or(now);
            return Ok(QueryStats::immediate_failure_at(failed_at)?);
        }
        let stats = QueryStats::aggregate(
            &self.timer(),
            self.root_stage()?,
            &self.stages,
            &self.peak_memory,
            &self.runtime_stats,
            now,
        )?;
        Ok(stats)
    }

    /// Publishes this dump into a live tracker.
    ///
    /// Stage snapshots replace what the tracker held; peaks are merged as
    /// maxima; runtime stats are treated as new observations.
    pub fn apply_to(&self, tracker: &QueryTracker) -> Result<()> {
        for stage in &self.stages {
            tracker.upsert_stage(stage.clone());
        }
        if let Some(root_id) = self.root_stage_id {
            tracker.set_root_stage(root_id)?;
        }
        for start in &self.phases {
            tracker.transition(start.phase, start.at);
        }
        tracker.peaks().record_peaks(&self.peak_memory);
        tracker.merge_runtime_stats(&self.runtime_stats);
        match (&self.failure, self.end_time) {
            (Some(reason), end_time) => {
                tracker.fail(reason.clone(), end_time.unwrap_or_else(Utc::now));
            }
            (None, Some(end_time)) => tracker.finish(end_time),
            (None, None) => {}
        }
        Ok(())
    }
}
