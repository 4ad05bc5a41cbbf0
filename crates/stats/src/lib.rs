//! Query statistics aggregation for Igloo.
//!
//! Folds the per-stage execution statistics of a distributed query into a
//! single validated [`QueryStats`] snapshot, used both for progress polling
//! while the query runs and for the final query history.

pub mod aggregate;
pub mod error;
pub mod fragment;
pub mod operator;
pub mod query_stats;
pub mod runtime_stats;
pub mod stage;
pub mod timer;
pub mod wire;

pub use aggregate::{retried_cpu_time, QueryStatsAccumulator};
pub use error::{InvalidQueryStats, MetricUnitMismatch};
pub use fragment::{FragmentType, PlanFragment};
pub use operator::{InputBucket, OperatorStats, OperatorType, OtherOperator};
pub use query_stats::{
    DataFlow, DataVolume, DriverCounts, ExecutionTimes, MemoryStats, PeakMemory, PhaseDurations,
    QueryStats, QueryStatsParts, QueryTimeline, TaskCounts, WorkCounts,
};
pub use runtime_stats::{stage_metric_name, RuntimeMetric, RuntimeStats, RuntimeUnit};
pub use stage::{
    BlockedReason, StageExecutionInfo, StageExecutionState, StageExecutionStats, StageGcStatistics,
    StageInfo,
};
pub use timer::{QueryPhase, QueryStateTimer};
pub use wire::WireQueryStats;
