//! Folding per-stage statistics into one [`QueryStats`].
//!
//! The fold is synchronous and allocation-light: every stage contributes its
//! latest attempt, read exactly once, to a [`QueryStatsAccumulator`], and the
//! accumulator is then sealed through the validating constructor.

use crate::error::InvalidQueryStats;
use crate::operator::{InputBucket, OperatorStats};
use crate::query_stats::{
    DataFlow, DriverCounts, ExecutionTimes, MemoryStats, PeakMemory, PhaseDurations, QueryStats,
    QueryStatsParts, QueryTimeline, TaskCounts, WorkCounts,
};
use crate::runtime_stats::RuntimeStats;
use crate::stage::{BlockedReason, StageExecutionStats, StageGcStatistics, StageInfo};
use crate::timer::QueryStateTimer;
use chrono::{DateTime, Utc};
use igloo_common::Duration;
use std::collections::BTreeSet;
use tracing::trace;

/// CPU time a stage spent on work that was thrown away: every earlier
/// attempt's CPU plus the task-level retries of the current attempt.
pub fn retried_cpu_time(stage: &StageInfo) -> Duration {
    let previous: u64 = stage
        .previous_attempts()
        .iter()
        .map(|attempt| attempt.stats().total_cpu_time.round_to_millis())
        .fold(0, u64::saturating_add);
    let current = stage
        .latest_attempt()
        .stats()
        .retried_cpu_time
        .round_to_millis();
    Duration::from_millis(previous.saturating_add(current))
}

/// Running totals of one aggregation pass.
#[derive(Debug, Clone)]
pub struct QueryStatsAccumulator {
    tasks: TaskCounts,
    drivers: DriverCounts,
    new_drivers: WorkCounts,
    splits: WorkCounts,
    memory: MemoryStats,
    times: ExecutionTimes,
    scheduled: bool,
    fully_blocked: bool,
    blocked_reasons: BTreeSet<BlockedReason>,
    data: DataFlow,
    stage_gc_statistics: Vec<StageGcStatistics>,
    operator_summaries: Vec<OperatorStats>,
    runtime_stats: RuntimeStats,
}

impl QueryStatsAccumulator {
    /// Empty totals. Without a root stage the query can be neither scheduled
    /// nor fully blocked.
    pub fn new(has_root: bool, runtime_stats: &RuntimeStats) -> Self {
        Self {
            tasks: TaskCounts::default(),
            drivers: DriverCounts::default(),
            new_drivers: WorkCounts::default(),
            splits: WorkCounts::default(),
            memory: MemoryStats::default(),
            times: ExecutionTimes::default(),
            scheduled: has_root,
            fully_blocked: has_root,
            blocked_reasons: BTreeSet::new(),
            data: DataFlow::default(),
            stage_gc_statistics: Vec::new(),
            operator_summaries: Vec::new(),
            runtime_stats: runtime_stats.clone(),
        }
    }

    /// Adds one stage to the totals.
    pub fn add_stage(mut self, stage: &StageInfo) -> Self {
        let latest = stage.latest_attempt();
        let state = latest.state();
        let stats = latest.stats();
        trace!(stage_id = %stage.stage_id(), ?state, "folding stage");

        self.add_counts(stats);
        self.times.retried_cpu_time = self
            .times
            .retried_cpu_time
            .saturating_add(retried_cpu_time(stage));

        if !state.is_done() {
            self.fully_blocked &= stats.fully_blocked;
            self.blocked_reasons.extend(stats.blocked_reasons.iter().copied());
        }

        if let Some(plan) = stage.plan() {
            self.add_data_flow(stats, plan.is_output_table_writer_fragment());
        }

        self.stage_gc_statistics.push(stats.gc_info);
        self.operator_summaries
            .extend(stats.operator_summaries.iter().cloned());
        self.runtime_stats
            .merge_stage(stage.stage_id(), &stats.runtime_stats);

        self.scheduled &= state.is_scheduled();
        self
    }

    fn add_counts(&mut self, stats: &StageExecutionStats) {
        let tasks = &mut self.tasks;
        tasks.total = tasks.total.saturating_add(stats.total_tasks);
        tasks.running = tasks.running.saturating_add(stats.running_tasks);
        tasks.completed = tasks.completed.saturating_add(stats.completed_tasks);

        let drivers = &mut self.drivers;
        drivers.total = drivers.total.saturating_add(stats.total_drivers);
        drivers.queued = drivers.queued.saturating_add(stats.queued_drivers);
        drivers.running = drivers.running.saturating_add(stats.running_drivers);
        drivers.blocked = drivers.blocked.saturating_add(stats.blocked_drivers);
        drivers.completed = drivers.completed.saturating_add(stats.completed_drivers);

        let new_drivers = &mut self.new_drivers;
        new_drivers.total = new_drivers.total.saturating_add(stats.total_new_drivers);
        new_drivers.queued = new_drivers.queued.saturating_add(stats.queued_new_drivers);
        new_drivers.running = new_drivers.running.saturating_add(stats.running_new_drivers);
        new_drivers.completed = new_drivers
            .completed
            .saturating_add(stats.completed_new_drivers);

        let splits = &mut self.splits;
        splits.total = splits.total.saturating_add(stats.total_splits);
        splits.queued = splits.queued.saturating_add(stats.queued_splits);
        splits.running = splits.running.saturating_add(stats.running_splits);
        splits.completed = splits.completed.saturating_add(stats.completed_splits);

        let memory = &mut self.memory;
        memory.cumulative_user_memory += stats.cumulative_user_memory;
        memory.cumulative_total_memory += stats.cumulative_total_memory;
        memory.user_memory_reservation = memory
            .user_memory_reservation
            .saturating_add(stats.user_memory_reservation);
        memory.total_memory_reservation = memory
            .total_memory_reservation
            .saturating_add(stats.total_memory_reservation);
        memory.total_allocation = memory
            .total_allocation
            .saturating_add(stats.total_allocation);

        let times = &mut self.times;
        times.total_scheduled_time = add_millis(times.total_scheduled_time, stats.total_scheduled_time);
        times.total_cpu_time = add_millis(times.total_cpu_time, stats.total_cpu_time);
        times.total_blocked_time = add_millis(times.total_blocked_time, stats.total_blocked_time);
    }

    fn add_data_flow(&mut self, stats: &StageExecutionStats, output_fragment: bool) {
        let data = &mut self.data;
        for operator in &stats.operator_summaries {
            match operator.operator_type.input_bucket(output_fragment) {
                Some(InputBucket::Shuffled) => data
                    .shuffled
                    .add(operator.raw_input_data_size, operator.raw_input_positions),
                Some(InputBucket::RawInput) => data
                    .raw_input
                    .add(operator.raw_input_data_size, operator.raw_input_positions),
                Some(InputBucket::WrittenOutput) => {
                    data.written_output_positions = data
                        .written_output_positions
                        .saturating_add(operator.input_positions);
                    data.written_output_logical_data_size = data
                        .written_output_logical_data_size
                        .saturating_add(operator.input_data_size);
                }
                None => {}
            }
        }

        data.processed_input.add(
            stats.processed_input_data_size,
            stats.processed_input_positions,
        );

        if output_fragment {
            data.written_output_physical_data_size = data
                .written_output_physical_data_size
                .saturating_add(stats.physical_written_data_size);
        } else {
            data.written_intermediate_physical_data_size = data
                .written_intermediate_physical_data_size
                .saturating_add(stats.physical_written_data_size);
        }
    }

    /// Seals the totals into a snapshot.
    ///
    /// The query's output is whatever its root stage has produced so far.
    pub fn finish(
        mut self,
        timeline: QueryTimeline,
        phases: PhaseDurations,
        root: Option<&StageInfo>,
        peaks: &PeakMemory,
    ) -> Result<QueryStats, InvalidQueryStats> {
        if let Some(root) = root {
            let output = root.latest_attempt().stats();
            self.data
                .output
                .add(output.output_data_size, output.output_positions);
        }

        self.tasks.peak_running = peaks.peak_running_tasks;
        self.memory.peak_user_memory_reservation = peaks.peak_user_memory_reservation;
        self.memory.peak_total_memory_reservation = peaks.peak_total_memory_reservation;
        self.memory.peak_task_user_memory = peaks.peak_task_user_memory;
        self.memory.peak_task_total_memory = peaks.peak_task_total_memory;
        self.memory.peak_node_total_memory = peaks.peak_node_total_memory;

        QueryStats::try_new(QueryStatsParts {
            timeline,
            phases,
            tasks: self.tasks,
            drivers: self.drivers,
            new_drivers: self.new_drivers,
            splits: self.splits,
            memory: self.memory,
            scheduled: self.scheduled,
            times: self.times,
            fully_blocked: self.fully_blocked,
            blocked_reasons: self.blocked_reasons,
            data: self.data,
            stage_gc_statistics: self.stage_gc_statistics,
            operator_summaries: self.operator_summaries,
            runtime_stats: self.runtime_stats,
        })
    }
}

fn add_millis(total: Duration, value: Duration) -> Duration {
    total.saturating_add(Duration::from_millis(value.round_to_millis()))
}

impl QueryStats {
    /// Aggregates the current statistics of every stage of a query.
    ///
    /// `stages` must contain every stage of the query, the root included;
    /// their order does not matter. `runtime_stats` are the query-level
    /// metrics collected outside of any stage, and `now` bounds every phase
    /// that is still open.
    pub fn aggregate<'a>(
        timer: &QueryStateTimer,
        root: Option<&StageInfo>,
        stages: impl IntoIterator<Item = &'a StageInfo>,
        peaks: &PeakMemory,
        runtime_stats: &RuntimeStats,
        now: DateTime<Utc>,
    ) -> Result<QueryStats, InvalidQueryStats> {
        stages
            .into_iter()
            .fold(
                QueryStatsAccumulator::new(root.is_some(), runtime_stats),
                QueryStatsAccumulator::add_stage,
            )
            .finish(timeline(timer), phases(timer, now), root, peaks)
    }
}

fn timeline(timer: &QueryStateTimer) -> QueryTimeline {
    QueryTimeline {
        create_time: timer.create_time_millis(),
        execution_start_time: timer.execution_start_time_millis(),
        last_heartbeat: timer.last_heartbeat_millis(),
        end_time: timer.end_time_millis(),
    }
}

fn phases(timer: &QueryStateTimer, now: DateTime<Utc>) -> PhaseDurations {
    PhaseDurations {
        elapsed: timer.elapsed_time(now),
        waiting_for_prerequisites: timer.waiting_for_prerequisites_time(now),
        queued: timer.queued_time(now),
        resource_waiting: timer.resource_waiting_time(now),
        semantic_analyzing: timer.semantic_analyzing_time(now),
        column_access_permission_checking: timer.column_access_permission_checking_time(now),
        dispatching: timer.dispatching_time(now),
        execution: timer.execution_time(now),
        analysis: timer.analysis_time(now),
        total_planning: timer.planning_time(now),
        finishing: timer.finishing_time(now),
    }
}
