//! The query-level statistics snapshot.
//!
//! A [`QueryStats`] can only be obtained through [`QueryStats::try_new`], or
//! through one of the adapters that delegate to it (wire deserialization,
//! [`QueryStats::aggregate`], [`QueryStats::immediate_failure`]), so every
//! value in circulation has passed validation.

use crate::error::InvalidQueryStats;
use crate::operator::OperatorStats;
use crate::runtime_stats::RuntimeStats;
use crate::stage::{BlockedReason, StageGcStatistics};
use chrono::{DateTime, Utc};
use igloo_common::{DataSize, Duration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Query lifecycle instants, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryTimeline {
    pub create_time: i64,
    pub execution_start_time: i64,
    pub last_heartbeat: i64,
    pub end_time: Option<i64>,
}

impl QueryTimeline {
    /// Every instant set to `millis`, with the query already ended.
    pub fn ended_at(millis: i64) -> Self {
        Self {
            create_time: millis,
            execution_start_time: millis,
            last_heartbeat: millis,
            end_time: Some(millis),
        }
    }
}

/// Wall time spent in each lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseDurations {
    pub elapsed: Duration,
    pub waiting_for_prerequisites: Duration,
    pub queued: Duration,
    pub resource_waiting: Duration,
    pub semantic_analyzing: Duration,
    pub column_access_permission_checking: Duration,
    pub dispatching: Duration,
    pub execution: Duration,
    pub analysis: Duration,
    pub total_planning: Duration,
    pub finishing: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: u32,
    pub running: u32,
    pub peak_running: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverCounts {
    pub total: u32,
    pub queued: u32,
    pub running: u32,
    pub blocked: u32,
    pub completed: u32,
}

/// Counts of schedulable work units (new drivers, splits).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkCounts {
    pub total: u32,
    pub queued: u32,
    pub running: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryStats {
    /// Byte-seconds.
    pub cumulative_user_memory: f64,
    /// Byte-seconds.
    pub cumulative_total_memory: f64,
    pub user_memory_reservation: DataSize,
    pub total_memory_reservation: DataSize,
    pub peak_user_memory_reservation: DataSize,
    pub peak_total_memory_reservation: DataSize,
    pub peak_task_user_memory: DataSize,
    pub peak_task_total_memory: DataSize,
    pub peak_node_total_memory: DataSize,
    pub total_allocation: DataSize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionTimes {
    pub total_scheduled_time: Duration,
    pub total_cpu_time: Duration,
    pub retried_cpu_time: Duration,
    pub total_blocked_time: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataVolume {
    pub data_size: DataSize,
    pub positions: u64,
}

impl DataVolume {
    pub fn new(data_size: DataSize, positions: u64) -> Self {
        Self {
            data_size,
            positions,
        }
    }

    pub(crate) fn add(&mut self, data_size: DataSize, positions: u64) {
        self.data_size = self.data_size.saturating_add(data_size);
        self.positions = self.positions.saturating_add(positions);
    }
}

/// Data read, moved between stages and written by the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataFlow {
    pub raw_input: DataVolume,
    pub processed_input: DataVolume,
    pub shuffled: DataVolume,
    pub output: DataVolume,
    pub written_output_positions: u64,
    pub written_output_logical_data_size: DataSize,
    pub written_output_physical_data_size: DataSize,
    pub written_intermediate_physical_data_size: DataSize,
}

/// Peak figures observed over the query's lifetime.
///
/// These cannot be recomputed from a single stage snapshot, so whoever
/// tracks the query collects them and hands them to the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeakMemory {
    pub peak_running_tasks: u32,
    pub peak_user_memory_reservation: DataSize,
    pub peak_total_memory_reservation: DataSize,
    pub peak_task_user_memory: DataSize,
    pub peak_task_total_memory: DataSize,
    pub peak_node_total_memory: DataSize,
}

/// Unvalidated contents of a [`QueryStats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStatsParts {
    pub timeline: QueryTimeline,
    pub phases: PhaseDurations,
    pub tasks: TaskCounts,
    pub drivers: DriverCounts,
    pub new_drivers: WorkCounts,
    pub splits: WorkCounts,
    pub memory: MemoryStats,
    pub scheduled: bool,
    pub times: ExecutionTimes,
    pub fully_blocked: bool,
    pub blocked_reasons: BTreeSet<BlockedReason>,
    pub data: DataFlow,
    pub stage_gc_statistics: Vec<StageGcStatistics>,
    pub operator_summaries: Vec<OperatorStats>,
    pub runtime_stats: RuntimeStats,
}

/// Immutable, validated statistics of one query at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::wire::WireQueryStats", into = "crate::wire::WireQueryStats")]
pub struct QueryStats {
    parts: QueryStatsParts,
}

impl QueryStats {
    /// Validates `parts` and seals them into a snapshot.
    pub fn try_new(parts: QueryStatsParts) -> Result<Self, InvalidQueryStats> {
        let timeline = &parts.timeline;
        non_negative_instant("createTime", timeline.create_time)?;
        non_negative_instant("executionStartTime", timeline.execution_start_time)?;
        non_negative_instant("lastHeartbeat", timeline.last_heartbeat)?;
        if let Some(end_time) = timeline.end_time {
            non_negative_instant("endTime", end_time)?;
        }
        non_negative_amount("cumulativeUserMemory", parts.memory.cumulative_user_memory)?;
        non_negative_amount("cumulativeTotalMemory", parts.memory.cumulative_total_memory)?;
        let data = &parts.data;
        signed_count("rawInputPositions", data.raw_input.positions)?;
        signed_count("processedInputPositions", data.processed_input.positions)?;
        signed_count("shuffledPositions", data.shuffled.positions)?;
        signed_count("outputPositions", data.output.positions)?;
        signed_count("writtenOutputPositions", data.written_output_positions)?;

        debug!(
            total_drivers = parts.drivers.total,
            completed_drivers = parts.drivers.completed,
            scheduled = parts.scheduled,
            fully_blocked = parts.fully_blocked,
            "built query stats"
        );
        Ok(Self { parts })
    }

    /// Snapshot of a query that failed before any stage existed.
    pub fn immediate_failure() -> Result<Self, InvalidQueryStats> {
        Self::immediate_failure_at(Utc::now())
    }

    /// Like [`immediate_failure`](Self::immediate_failure), at a fixed instant.
    pub fn immediate_failure_at(now: DateTime<Utc>) -> Result<Self, InvalidQueryStats> {
        Self::try_new(QueryStatsParts {
            timeline: QueryTimeline::ended_at(now.timestamp_millis()),
            ..Default::default()
        })
    }

    pub fn parts(&self) -> &QueryStatsParts {
        &self.parts
    }

    pub fn into_parts(self) -> QueryStatsParts {
        self.parts
    }

    pub fn timeline(&self) -> &QueryTimeline {
        &self.parts.timeline
    }

    pub fn phases(&self) -> &PhaseDurations {
        &self.parts.phases
    }

    pub fn tasks(&self) -> &TaskCounts {
        &self.parts.tasks
    }

    pub fn drivers(&self) -> &DriverCounts {
        &self.parts.drivers
    }

    pub fn new_drivers(&self) -> &WorkCounts {
        &self.parts.new_drivers
    }

    pub fn splits(&self) -> &WorkCounts {
        &self.parts.splits
    }

    pub fn memory(&self) -> &MemoryStats {
        &self.parts.memory
    }

    pub fn is_scheduled(&self) -> bool {
        self.parts.scheduled
    }

    pub fn times(&self) -> &ExecutionTimes {
        &self.parts.times
    }

    pub fn is_fully_blocked(&self) -> bool {
        self.parts.fully_blocked
    }

    pub fn blocked_reasons(&self) -> &BTreeSet<BlockedReason> {
        &self.parts.blocked_reasons
    }

    pub fn data(&self) -> &DataFlow {
        &self.parts.data
    }

    pub fn stage_gc_statistics(&self) -> &[StageGcStatistics] {
        &self.parts.stage_gc_statistics
    }

    pub fn operator_summaries(&self) -> &[OperatorStats] {
        &self.parts.operator_summaries
    }

    pub fn runtime_stats(&self) -> &RuntimeStats {
        &self.parts.runtime_stats
    }

    /// Share of drivers completed, capped at 100.
    ///
    /// Unknown until every stage is scheduled and at least one driver exists.
    pub fn progress_percentage(&self) -> Option<f64> {
        let drivers = &self.parts.drivers;
        if !self.parts.scheduled || drivers.total == 0 {
            return None;
        }
        Some((f64::from(drivers.completed) * 100.0 / f64::from(drivers.total)).min(100.0))
    }

    /// Bytes spilled to disk by every operator of the query.
    pub fn spilled_data_size(&self) -> DataSize {
        self.parts
            .operator_summaries
            .iter()
            .map(|operator| operator.spilled_data_size)
            .sum()
    }
}

fn non_negative_instant(field: &'static str, millis: i64) -> Result<(), InvalidQueryStats> {
    if millis < 0 {
        return Err(InvalidQueryStats::negative(field, millis));
    }
    if DateTime::from_timestamp_millis(millis).is_none() {
        return Err(InvalidQueryStats::out_of_range(field, millis));
    }
    Ok(())
}

// Counters travel as signed integers on the wire.
fn signed_count(field: &'static str, value: u64) -> Result<(), InvalidQueryStats> {
    if i64::try_from(value).is_err() {
        return Err(InvalidQueryStats::out_of_range(field, value));
    }
    Ok(())
}

fn non_negative_amount(field: &'static str, value: f64) -> Result<(), InvalidQueryStats> {
    if !value.is_finite() {
        return Err(InvalidQueryStats::not_finite(field, value));
    }
    if value < 0.0 {
        return Err(InvalidQueryStats::negative(field, value));
    }
    Ok(())
}
