//! JSON shape of [`QueryStats`].
//!
//! Counters travel as signed integers so that a negative value reaches the
//! validator and is rejected by name instead of failing deep inside the
//! deserializer. Sizes and durations are unit-suffixed strings and instants
//! are RFC 3339.

use crate::error::InvalidQueryStats;
use crate::operator::OperatorStats;
use crate::query_stats::{
    DataFlow, DataVolume, DriverCounts, ExecutionTimes, MemoryStats, PhaseDurations, QueryStats,
    QueryStatsParts, QueryTimeline, TaskCounts, WorkCounts,
};
use crate::runtime_stats::RuntimeStats;
use crate::stage::{BlockedReason, StageGcStatistics};
use chrono::{DateTime, Utc};
use igloo_common::{DataSize, Duration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireQueryStats {
    pub create_time: DateTime<Utc>,
    pub execution_start_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,

    pub elapsed_time: Duration,
    pub waiting_for_prerequisites_time: Duration,
    pub queued_time: Duration,
    pub resource_waiting_time: Duration,
    pub semantic_analyzing_time: Duration,
    pub column_access_permission_checking_time: Duration,
    pub dispatching_time: Duration,
    pub execution_time: Duration,
    pub analysis_time: Duration,
    pub total_planning_time: Duration,
    pub finishing_time: Duration,

    pub total_tasks: i64,
    pub running_tasks: i64,
    pub peak_running_tasks: i64,
    pub completed_tasks: i64,

    pub total_drivers: i64,
    pub queued_drivers: i64,
    pub running_drivers: i64,
    pub blocked_drivers: i64,
    pub completed_drivers: i64,

    pub total_new_drivers: i64,
    pub queued_new_drivers: i64,
    pub running_new_drivers: i64,
    pub completed_new_drivers: i64,

    pub total_splits: i64,
    pub queued_splits: i64,
    pub running_splits: i64,
    pub completed_splits: i64,

    pub cumulative_user_memory: f64,
    pub cumulative_total_memory: f64,
    pub user_memory_reservation: DataSize,
    pub total_memory_reservation: DataSize,
    pub peak_user_memory_reservation: DataSize,
    pub peak_total_memory_reservation: DataSize,
    pub peak_task_user_memory: DataSize,
    pub peak_task_total_memory: DataSize,
    pub peak_node_total_memory: DataSize,

    pub scheduled: bool,
    pub total_scheduled_time: Duration,
    pub total_cpu_time: Duration,
    pub retried_cpu_time: Duration,
    pub total_blocked_time: Duration,
    pub fully_blocked: bool,
    pub blocked_reasons: BTreeSet<BlockedReason>,

    pub total_allocation: DataSize,

    pub raw_input_data_size: DataSize,
    pub raw_input_positions: i64,
    pub processed_input_data_size: DataSize,
    pub processed_input_positions: i64,
    pub shuffled_data_size: DataSize,
    pub shuffled_positions: i64,
    pub output_data_size: DataSize,
    pub output_positions: i64,

    pub written_output_positions: i64,
    pub written_output_logical_data_size: DataSize,
    pub written_output_physical_data_size: DataSize,
    pub written_intermediate_physical_data_size: DataSize,

    pub stage_gc_statistics: Vec<StageGcStatistics>,
    pub operator_summaries: Vec<OperatorStats>,
    pub runtime_stats: RuntimeStats,

    // derived on output, ignored on input
    #[serde(skip_deserializing)]
    pub progress_percentage: Option<f64>,
    #[serde(skip_deserializing)]
    pub spilled_data_size: DataSize,
}

impl TryFrom<WireQueryStats> for QueryStats {
    type Error = InvalidQueryStats;

    fn try_from(wire: WireQueryStats) -> Result<Self, Self::Error> {
        let parts = QueryStatsParts {
            timeline: QueryTimeline {
                create_time: wire.create_time.timestamp_millis(),
                execution_start_time: wire.execution_start_time.timestamp_millis(),
                last_heartbeat: wire.last_heartbeat.timestamp_millis(),
                end_time: wire.end_time.map(|end| end.timestamp_millis()),
            },
            phases: PhaseDurations {
                elapsed: wire.elapsed_time,
                waiting_for_prerequisites: wire.waiting_for_prerequisites_time,
                queued: wire.queued_time,
                resource_waiting: wire.resource_waiting_time,
                semantic_analyzing: wire.semantic_analyzing_time,
                column_access_permission_checking: wire.column_access_permission_checking_time,
                dispatching: wire.dispatching_time,
                execution: wire.execution_time,
                analysis: wire.analysis_time,
                total_planning: wire.total_planning_time,
                finishing: wire.finishing_time,
            },
            tasks: TaskCounts {
                total: count("totalTasks", wire.total_tasks)?,
                running: count("runningTasks", wire.running_tasks)?,
                peak_running: count("peakRunningTasks", wire.peak_running_tasks)?,
                completed: count("completedTasks", wire.completed_tasks)?,
            },
            drivers: DriverCounts {
                total: count("totalDrivers", wire.total_drivers)?,
                queued: count("queuedDrivers", wire.queued_drivers)?,
                running: count("runningDrivers", wire.running_drivers)?,
                blocked: count("blockedDrivers", wire.blocked_drivers)?,
                completed: count("completedDrivers", wire.completed_drivers)?,
            },
            new_drivers: WorkCounts {
                total: count("totalNewDrivers", wire.total_new_drivers)?,
                queued: count("queuedNewDrivers", wire.queued_new_drivers)?,
                running: count("runningNewDrivers", wire.running_new_drivers)?,
                completed: count("completedNewDrivers", wire.completed_new_drivers)?,
            },
            splits: WorkCounts {
                total: count("totalSplits", wire.total_splits)?,
                queued: count("queuedSplits", wire.queued_splits)?,
                running: count("runningSplits", wire.running_splits)?,
                completed: count("completedSplits", wire.completed_splits)?,
            },
            memory: MemoryStats {
                cumulative_user_memory: wire.cumulative_user_memory,
                cumulative_total_memory: wire.cumulative_total_memory,
                user_memory_reservation: wire.user_memory_reservation,
                total_memory_reservation: wire.total_memory_reservation,
                peak_user_memory_reservation: wire.peak_user_memory_reservation,
                peak_total_memory_reservation: wire.peak_total_memory_reservation,
                peak_task_user_memory: wire.peak_task_user_memory,
                peak_task_total_memory: wire.peak_task_total_memory,
                peak_node_total_memory: wire.peak_node_total_memory,
                total_allocation: wire.total_allocation,
            },
            scheduled: wire.scheduled,
            times: ExecutionTimes {
                total_scheduled_time: wire.total_scheduled_time,
                total_cpu_time: wire.total_cpu_time,
                retried_cpu_time: wire.retried_cpu_time,
                total_blocked_time: wire.total_blocked_time,
            },
            fully_blocked: wire.fully_blocked,
            blocked_reasons: wire.blocked_reasons,
            data: DataFlow {
                raw_input: DataVolume::new(
                    wire.raw_input_data_size,
                    count("rawInputPositions", wire.raw_input_positions)?,
                ),
                processed_input: DataVolume::new(
                    wire.processed_input_data_size,
                    count("processedInputPositions", wire.processed_input_positions)?,
                ),
                shuffled: DataVolume::new(
                    wire.shuffled_data_size,
                    count("shuffledPositions", wire.shuffled_positions)?,
                ),
                output: DataVolume::new(
                    wire.output_data_size,
                    count("outputPositions", wire.output_positions)?,
                ),
                written_output_positions: count(
                    "writtenOutputPositions",
                    wire.written_output_positions,
                )?,
                written_output_logical_data_size: wire.written_output_logical_data_size,
                written_output_physical_data_size: wire.written_output_physical_data_size,
                written_intermediate_physical_data_size: wire
                    .written_intermediate_physical_data_size,
            },
            stage_gc_statistics: wire.stage_gc_statistics,
            operator_summaries: wire.operator_summaries,
            runtime_stats: wire.runtime_stats,
        };
        QueryStats::try_new(parts)
    }
}

impl From<QueryStats> for WireQueryStats {
    fn from(stats: QueryStats) -> Self {
        let progress_percentage = stats.progress_percentage();
        let spilled_data_size = stats.spilled_data_size();
        let QueryStatsParts {
            timeline,
            phases,
            tasks,
            drivers,
            new_drivers,
            splits,
            memory,
            scheduled,
            times,
            fully_blocked,
            blocked_reasons,
            data,
            stage_gc_statistics,
            operator_summaries,
            runtime_stats,
        } = stats.into_parts();

        Self {
            create_time: instant(timeline.create_time),
            execution_start_time: instant(timeline.execution_start_time),
            last_heartbeat: instant(timeline.last_heartbeat),
            end_time: timeline.end_time.map(instant),

            elapsed_time: phases.elapsed,
            waiting_for_prerequisites_time: phases.waiting_for_prerequisites,
            queued_time: phases.queued,
            resource_waiting_time: phases.resource_waiting,
            semantic_analyzing_time: phases.semantic_analyzing,
            column_access_permission_checking_time: phases.column_access_permission_checking,
            dispatching_time: phases.dispatching,
            execution_time: phases.execution,
            analysis_time: phases.analysis,
            total_planning_time: phases.total_planning,
            finishing_time: phases.finishing,

            total_tasks: tasks.total.into(),
            running_tasks: tasks.running.into(),
            peak_running_tasks: tasks.peak_running.into(),
            completed_tasks: tasks.completed.into(),

            total_drivers: drivers.total.into(),
            queued_drivers: drivers.queued.into(),
            running_drivers: drivers.running.into(),
            blocked_drivers: drivers.blocked.into(),
            completed_drivers: drivers.completed.into(),

            total_new_drivers: new_drivers.total.into(),
            queued_new_drivers: new_drivers.queued.into(),
            running_new_drivers: new_drivers.running.into(),
            completed_new_drivers: new_drivers.completed.into(),

            total_splits: splits.total.into(),
            queued_splits: splits.queued.into(),
            running_splits: splits.running.into(),
            completed_splits: splits.completed.into(),

            cumulative_user_memory: memory.cumulative_user_memory,
            cumulative_total_memory: memory.cumulative_total_memory,
            user_memory_reservation: memory.user_memory_reservation,
            total_memory_reservation: memory.total_memory_reservation,
            peak_user_memory_reservation: memory.peak_user_memory_reservation,
            peak_total_memory_reservation: memory.peak_total_memory_reservation,
            peak_task_user_memory: memory.peak_task_user_memory,
            peak_task_total_memory: memory.peak_task_total_memory,
            peak_node_total_memory: memory.peak_node_total_memory,

            scheduled,
            total_scheduled_time: times.total_scheduled_time,
            total_cpu_time: times.total_cpu_time,
            retried_cpu_time: times.retried_cpu_time,
            total_blocked_time: times.total_blocked_time,
            fully_blocked,
            blocked_reasons,

            total_allocation: memory.total_allocation,

            raw_input_data_size: data.raw_input.data_size,
            raw_input_positions: signed(data.raw_input.positions),
            processed_input_data_size: data.processed_input.data_size,
            processed_input_positions: signed(data.processed_input.positions),
            shuffled_data_size: data.shuffled.data_size,
            shuffled_positions: signed(data.shuffled.positions),
            output_data_size: data.output.data_size,
            output_positions: signed(data.output.positions),

            written_output_positions: signed(data.written_output_positions),
            written_output_logical_data_size: data.written_output_logical_data_size,
            written_output_physical_data_size: data.written_output_physical_data_size,
            written_intermediate_physical_data_size: data.written_intermediate_physical_data_size,

            stage_gc_statistics,
            operator_summaries,
            runtime_stats,

            progress_percentage,
            spilled_data_size,
        }
    }
}

fn count<T: TryFrom<i64>>(field: &'static str, value: i64) -> Result<T, InvalidQueryStats> {
    if value < 0 {
        return Err(InvalidQueryStats::negative(field, value));
    }
    T::try_from(value).map_err(|_| InvalidQueryStats::out_of_range(field, value))
}

// `QueryStats::try_new` rejects positions that do not fit.
fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// Validated snapshots only hold instants chrono can represent.
fn instant(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
