//! Wall-clock bookkeeping of a query's lifecycle phases.

use chrono::{DateTime, Utc};
use igloo_common::Duration;
use serde::{Deserialize, Serialize};

/// Lifecycle phases of a query, in the order they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryPhase {
    WaitingForPrerequisites,
    Queued,
    WaitingForResources,
    SemanticAnalyzing,
    ColumnAccessPermissionChecking,
    Dispatching,
    Planning,
    Running,
    Finishing,
}

const PHASE_COUNT: usize = 9;

impl QueryPhase {
    fn index(self) -> usize {
        self as usize
    }
}

/// Records when each phase of one query began and when the query ended.
///
/// Phases only move forward: beginning a phase that is not later than the
/// current one is ignored, as is anything after [`end`](Self::end). Phases
/// that were skipped measure zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStateTimer {
    create_time: DateTime<Utc>,
    phase_starts: [Option<DateTime<Utc>>; PHASE_COUNT],
    current_phase: QueryPhase,
    last_heartbeat: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl QueryStateTimer {
    /// Starts the timer; the query begins waiting for its prerequisites.
    pub fn new(create_time: DateTime<Utc>) -> Self {
        let mut phase_starts = [None; PHASE_COUNT];
        phase_starts[QueryPhase::WaitingForPrerequisites.index()] = Some(create_time);
        Self {
            create_time,
            phase_starts,
            current_phase: QueryPhase::WaitingForPrerequisites,
            last_heartbeat: create_time,
            end_time: None,
        }
    }

    pub fn current_phase(&self) -> QueryPhase {
        self.current_phase
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// Enters `phase` at `now`. Returns whether the transition was applied.
    pub fn begin(&mut self, phase: QueryPhase, now: DateTime<Utc>) -> bool {
        if self.is_ended() || phase <= self.current_phase {
            return false;
        }
        self.phase_starts[phase.index()] = Some(now);
        self.current_phase = phase;
        true
    }

    /// Marks the query as ended. Only the first call has an effect.
    pub fn end(&mut self, now: DateTime<Utc>) {
        if self.end_time.is_none() {
            self.end_time = Some(now);
            self.record_heartbeat(now);
        }
    }

    pub fn record_heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = self.last_heartbeat.max(now);
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn create_time_millis(&self) -> i64 {
        self.create_time.timestamp_millis()
    }

    /// Start of execution: the beginning of planning, or of running when
    /// planning was skipped. Before that it is the creation time.
    pub fn execution_start_time(&self) -> DateTime<Utc> {
        self.execution_start().unwrap_or(self.create_time)
    }

    pub fn execution_start_time_millis(&self) -> i64 {
        self.execution_start_time().timestamp_millis()
    }

    pub fn last_heartbeat_millis(&self) -> i64 {
        self.last_heartbeat.timestamp_millis()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn end_time_millis(&self) -> Option<i64> {
        self.end_time.map(|end| end.timestamp_millis())
    }

    pub fn elapsed_time(&self, now: DateTime<Utc>) -> Duration {
        span(self.create_time, self.stop(now))
    }

    pub fn waiting_for_prerequisites_time(&self, now: DateTime<Utc>) -> Duration {
        self.phase_time(QueryPhase::WaitingForPrerequisites, now)
    }

    pub fn queued_time(&self, now: DateTime<Utc>) -> Duration {
        self.phase_time(QueryPhase::Queued, now)
    }

    pub fn resource_waiting_time(&self, now: DateTime<Utc>) -> Duration {
        self.phase_time(QueryPhase::WaitingForResources, now)
    }

    pub fn semantic_analyzing_time(&self, now: DateTime<Utc>) -> Duration {
        self.phase_time(QueryPhase::SemanticAnalyzing, now)
    }

    pub fn column_access_permission_checking_time(&self, now: DateTime<Utc>) -> Duration {
        self.phase_time(QueryPhase::ColumnAccessPermissionChecking, now)
    }

    pub fn dispatching_time(&self, now: DateTime<Utc>) -> Duration {
        self.phase_time(QueryPhase::Dispatching, now)
    }

    pub fn planning_time(&self, now: DateTime<Utc>) -> Duration {
        self.phase_time(QueryPhase::Planning, now)
    }

    pub fn finishing_time(&self, now: DateTime<Utc>) -> Duration {
        self.phase_time(QueryPhase::Finishing, now)
    }

    /// Semantic analysis plus column access checks.
    pub fn analysis_time(&self, now: DateTime<Utc>) -> Duration {
        self.semantic_analyzing_time(now)
            .saturating_add(self.column_access_permission_checking_time(now))
    }

    /// From the start of execution until the end (or `now`); zero before
    /// execution starts.
    pub fn execution_time(&self, now: DateTime<Utc>) -> Duration {
        match self.execution_start() {
            Some(start) => span(start, self.stop(now)),
            None => Duration::ZERO,
        }
    }

    fn execution_start(&self) -> Option<DateTime<Utc>> {
        self.phase_starts[QueryPhase::Planning.index()]
            .or(self.phase_starts[QueryPhase::Running.index()])
    }

    fn stop(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end_time.unwrap_or(now)
    }

    /// Time spent in `phase`: from its start to the start of the next phase
    /// that was entered, or to the end of the query, or to `now`.
    fn phase_time(&self, phase: QueryPhase, now: DateTime<Utc>) -> Duration {
        let Some(start) = self.phase_starts[phase.index()] else {
            return Duration::ZERO;
        };
        let next_start = self.phase_starts[phase.index() + 1..]
            .iter()
            .flatten()
            .next()
            .copied();
        span(start, next_start.unwrap_or_else(|| self.stop(now)))
    }
}

fn span(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from)
        .to_std()
        .map(Duration::from_std)
        .unwrap_or(Duration::ZERO)
}
