//! Stage and attempt snapshots, as published by each stage's reporters.
//!
//! Everything here is a plain immutable value: a reporter builds a new
//! [`StageInfo`] for every update and publishes it whole, and the aggregator
//! only ever reads.

use crate::fragment::PlanFragment;
use crate::operator::OperatorStats;
use crate::runtime_stats::RuntimeStats;
use igloo_common::{DataSize, Duration, StageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Lifecycle state of one stage attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageExecutionState {
    #[default]
    Planned,
    Scheduling,
    Scheduled,
    Running,
    Finished,
    Canceled,
    Aborted,
    Failed,
}

impl StageExecutionState {
    /// Terminal states; an attempt in one of these never changes again.
    pub fn is_done(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Canceled | Self::Aborted | Self::Failed
        )
    }

    /// Running or terminal, i.e. no longer waiting to be scheduled.
    pub fn is_scheduled(self) -> bool {
        self == Self::Running || self.is_done()
    }
}

/// Why a non-terminal stage is not making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockedReason {
    WaitingForMemory,
    WaitingForInput,
    WaitingForOutput,
    WaitingForSplits,
}

/// Full-GC pauses observed by the tasks of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageGcStatistics {
    pub stage_id: StageId,
    pub stage_execution_id: u32,
    pub tasks: u32,
    pub full_gc_tasks: u32,
    pub min_full_gc_sec: u32,
    pub max_full_gc_sec: u32,
    pub total_full_gc_sec: u32,
    pub average_full_gc_sec: u32,
}

/// Counters of one stage attempt, captured at a single instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageExecutionStats {
    pub total_tasks: u32,
    pub queued_tasks: u32,
    pub running_tasks: u32,
    pub blocked_tasks: u32,
    pub completed_tasks: u32,

    pub total_drivers: u32,
    pub queued_drivers: u32,
    pub running_drivers: u32,
    pub blocked_drivers: u32,
    pub completed_drivers: u32,

    pub total_new_drivers: u32,
    pub queued_new_drivers: u32,
    pub running_new_drivers: u32,
    pub blocked_new_drivers: u32,
    pub completed_new_drivers: u32,

    pub total_splits: u32,
    pub queued_splits: u32,
    pub running_splits: u32,
    pub blocked_splits: u32,
    pub completed_splits: u32,

    /// Byte-seconds of user memory held by the stage so far.
    pub cumulative_user_memory: f64,
    /// Byte-seconds of user plus system memory held by the stage so far.
    pub cumulative_total_memory: f64,
    pub user_memory_reservation: DataSize,
    pub total_memory_reservation: DataSize,
    pub peak_user_memory_reservation: DataSize,
    pub peak_total_memory_reservation: DataSize,

    pub total_scheduled_time: Duration,
    pub total_cpu_time: Duration,
    /// CPU spent on task-level retries inside this attempt.
    pub retried_cpu_time: Duration,
    pub total_blocked_time: Duration,
    pub fully_blocked: bool,
    pub blocked_reasons: BTreeSet<BlockedReason>,

    pub total_allocation: DataSize,

    pub raw_input_data_size: DataSize,
    pub raw_input_positions: u64,
    pub processed_input_data_size: DataSize,
    pub processed_input_positions: u64,
    pub output_data_size: DataSize,
    pub output_positions: u64,
    pub physical_written_data_size: DataSize,

    pub gc_info: StageGcStatistics,
    pub operator_summaries: Vec<OperatorStats>,
    pub runtime_stats: RuntimeStats,
}

/// One execution try of a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExecutionInfo {
    state: StageExecutionState,
    #[serde(default)]
    stats: StageExecutionStats,
}

impl StageExecutionInfo {
    pub fn new(state: StageExecutionState, stats: StageExecutionStats) -> Self {
        Self { state, stats }
    }

    pub fn state(&self) -> StageExecutionState {
        self.state
    }

    pub fn stats(&self) -> &StageExecutionStats {
        &self.stats
    }
}

/// Immutable snapshot of one stage: its plan and every attempt so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    stage_id: StageId,
    #[serde(default)]
    plan: Option<PlanFragment>,
    #[serde(default = "no_attempts")]
    previous_attempts: Arc<[StageExecutionInfo]>,
    latest_attempt: StageExecutionInfo,
}

impl StageInfo {
    /// A stage on its first attempt.
    pub fn new(
        stage_id: StageId,
        plan: Option<PlanFragment>,
        latest_attempt: StageExecutionInfo,
    ) -> Self {
        Self {
            stage_id,
            plan,
            previous_attempts: no_attempts(),
            latest_attempt,
        }
    }

    pub fn with_previous_attempts(mut self, previous_attempts: Vec<StageExecutionInfo>) -> Self {
        self.previous_attempts = Arc::from(previous_attempts);
        self
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn plan(&self) -> Option<&PlanFragment> {
        self.plan.as_ref()
    }

    /// Earlier attempts, oldest first. All of them are terminal.
    pub fn previous_attempts(&self) -> &[StageExecutionInfo] {
        &self.previous_attempts
    }

    pub fn latest_attempt(&self) -> &StageExecutionInfo {
        &self.latest_attempt
    }

    /// The same stage with its plan replaced.
    pub fn with_plan(&self, plan: PlanFragment) -> Self {
        Self {
            plan: Some(plan),
            ..self.clone()
        }
    }

    /// The same stage with a new latest attempt snapshot.
    pub fn with_latest_attempt(&self, latest_attempt: StageExecutionInfo) -> Self {
        Self {
            stage_id: self.stage_id,
            plan: self.plan.clone(),
            previous_attempts: Arc::clone(&self.previous_attempts),
            latest_attempt,
        }
    }

    /// The stage after starting a new attempt.
    ///
    /// The current attempt moves to the history; if it had not reached a
    /// terminal state it is recorded as failed.
    pub fn retried(&self) -> Self {
        let mut abandoned = self.latest_attempt.clone();
        if !abandoned.state.is_done() {
            abandoned.state = StageExecutionState::Failed;
        }
        let previous_attempts: Vec<_> = self
            .previous_attempts
            .iter()
            .cloned()
            .chain(std::iter::once(abandoned))
            .collect();
        Self {
            stage_id: self.stage_id,
            plan: self.plan.clone(),
            previous_attempts: Arc::from(previous_attempts),
            latest_attempt: StageExecutionInfo::default(),
        }
    }
}

fn no_attempts() -> Arc<[StageExecutionInfo]> {
    Arc::from(Vec::new())
}
