#![allow(dead_code)]

use chrono::{DateTime, Utc};
use igloo_common::{PlanFragmentId, StageId};
use igloo_stats::{
    FragmentType, PeakMemory, PlanFragment, QueryPhase, QueryStateTimer, QueryStats, RuntimeStats,
    StageExecutionInfo, StageExecutionState, StageExecutionStats, StageInfo,
};

pub const BASE_MILLIS: i64 = 1_700_000_000_000;

pub fn at(offset_millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(BASE_MILLIS + offset_millis).unwrap()
}

/// A timer for a query that was created at `at(0)` and started running at `at(100)`.
pub fn running_timer() -> QueryStateTimer {
    let mut timer = QueryStateTimer::new(at(0));
    timer.begin(QueryPhase::Planning, at(20));
    timer.begin(QueryPhase::Running, at(100));
    timer
}

pub fn stage(id: u32, state: StageExecutionState, stats: StageExecutionStats) -> StageInfo {
    StageInfo::new(StageId(id), None, StageExecutionInfo::new(state, stats))
}

pub fn planned_stage(
    id: u32,
    fragment_type: FragmentType,
    state: StageExecutionState,
    stats: StageExecutionStats,
) -> StageInfo {
    let plan = PlanFragment::new(PlanFragmentId(id), fragment_type, Vec::new());
    StageInfo::new(StageId(id), Some(plan), StageExecutionInfo::new(state, stats))
}

/// Aggregates `stages`, treating the first one as the root.
pub fn aggregate(stages: &[StageInfo]) -> QueryStats {
    QueryStats::aggregate(
        &running_timer(),
        stages.first(),
        stages,
        &PeakMemory::default(),
        &RuntimeStats::new(),
        at(1_000),
    )
    .unwrap()
}
