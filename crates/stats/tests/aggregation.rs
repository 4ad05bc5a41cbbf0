mod common;

use common::{aggregate, at, planned_stage, running_timer, stage};
use igloo_common::{DataSize, Duration, StageId};
use igloo_stats::{
    BlockedReason, FragmentType, OperatorStats, OperatorType, PeakMemory, QueryStats,
    RuntimeStats, RuntimeUnit, StageExecutionInfo, StageExecutionState, StageExecutionStats,
    StageGcStatistics,
};
use std::collections::BTreeSet;

fn operator(stage_id: u32, operator_type: OperatorType) -> OperatorStats {
    OperatorStats::new(StageId(stage_id), 0, operator_type)
}

#[test]
fn test_table_scan_feeds_raw_input() {
    let mut scan = operator(1, OperatorType::TableScan);
    scan.raw_input_positions = 1000;
    scan.raw_input_data_size = DataSize::from_bytes(2048);
    let stats = StageExecutionStats {
        operator_summaries: vec![scan],
        ..Default::default()
    };

    let snapshot = aggregate(&[planned_stage(
        1,
        FragmentType::Scan,
        StageExecutionState::Running,
        stats,
    )]);

    assert_eq!(snapshot.data().raw_input.positions, 1000);
    assert_eq!(snapshot.data().raw_input.data_size, DataSize::from_bytes(2048));
    assert_eq!(snapshot.data().shuffled.positions, 0);
    assert_eq!(snapshot.data().shuffled.data_size, DataSize::ZERO);
}

#[test]
fn test_retried_attempt_cpu_is_kept_apart() {
    let current = StageExecutionStats {
        total_cpu_time: Duration::from_millis(300),
        retried_cpu_time: Duration::from_millis(50),
        ..Default::default()
    };
    let previous = StageExecutionStats {
        total_cpu_time: Duration::from_millis(500),
        ..Default::default()
    };
    let retried = stage(1, StageExecutionState::Running, current).with_previous_attempts(vec![
        StageExecutionInfo::new(StageExecutionState::Failed, previous),
    ]);

    let snapshot = aggregate(&[retried]);

    assert_eq!(snapshot.times().total_cpu_time, Duration::from_millis(300));
    assert_eq!(snapshot.times().retried_cpu_time, Duration::from_millis(550));
}

#[test]
fn test_all_drivers_completed_is_full_progress() {
    let stats = StageExecutionStats {
        total_drivers: 10,
        completed_drivers: 10,
        ..Default::default()
    };
    let snapshot = aggregate(&[stage(1, StageExecutionState::Finished, stats)]);

    assert!(snapshot.is_scheduled());
    assert_eq!(snapshot.progress_percentage(), Some(100.0));
}

#[test]
fn test_counts_are_summed_across_stages() {
    let stages: Vec<_> = (1..=4)
        .map(|id| {
            let stats = StageExecutionStats {
                total_tasks: id,
                running_tasks: 1,
                completed_tasks: id - 1,
                total_drivers: id * 10,
                queued_drivers: id,
                running_drivers: 2,
                blocked_drivers: 1,
                completed_drivers: id * 3,
                total_new_drivers: id * 4,
                completed_new_drivers: id,
                total_splits: id * 7,
                queued_splits: 2,
                running_splits: id,
                completed_splits: 1,
                cumulative_user_memory: 0.5,
                user_memory_reservation: DataSize::from_bytes(u64::from(id) * 1024),
                total_scheduled_time: Duration::from_millis(u64::from(id) * 100),
                ..Default::default()
            };
            stage(id, StageExecutionState::Running, stats)
        })
        .collect();

    let snapshot = aggregate(&stages);

    let sum = |f: fn(&StageExecutionStats) -> u32| -> u32 {
        stages
            .iter()
            .map(|s| f(s.latest_attempt().stats()))
            .sum()
    };
    assert_eq!(snapshot.tasks().total, sum(|s| s.total_tasks));
    assert_eq!(snapshot.tasks().running, sum(|s| s.running_tasks));
    assert_eq!(snapshot.tasks().completed, sum(|s| s.completed_tasks));
    assert_eq!(snapshot.drivers().total, sum(|s| s.total_drivers));
    assert_eq!(snapshot.drivers().queued, sum(|s| s.queued_drivers));
    assert_eq!(snapshot.drivers().running, sum(|s| s.running_drivers));
    assert_eq!(snapshot.drivers().blocked, sum(|s| s.blocked_drivers));
    assert_eq!(snapshot.drivers().completed, sum(|s| s.completed_drivers));
    assert_eq!(snapshot.new_drivers().total, sum(|s| s.total_new_drivers));
    assert_eq!(snapshot.new_drivers().completed, sum(|s| s.completed_new_drivers));
    assert_eq!(snapshot.splits().total, sum(|s| s.total_splits));
    assert_eq!(snapshot.splits().queued, sum(|s| s.queued_splits));
    assert_eq!(snapshot.splits().running, sum(|s| s.running_splits));
    assert_eq!(snapshot.splits().completed, sum(|s| s.completed_splits));
    assert_eq!(snapshot.memory().cumulative_user_memory, 2.0);
    assert_eq!(
        snapshot.memory().user_memory_reservation,
        DataSize::from_bytes(10 * 1024)
    );
    assert_eq!(
        snapshot.times().total_scheduled_time,
        Duration::from_millis(1_000)
    );
    assert_eq!(snapshot.progress_percentage(), Some(30.0));
}

#[test]
fn test_terminal_stages_do_not_contribute_blocked_state() {
    let blocked = |reason: BlockedReason| StageExecutionStats {
        fully_blocked: true,
        blocked_reasons: BTreeSet::from([reason]),
        ..Default::default()
    };
    let stages = [
        stage(0, StageExecutionState::Running, blocked(BlockedReason::WaitingForInput)),
        stage(1, StageExecutionState::Scheduled, blocked(BlockedReason::WaitingForMemory)),
        stage(2, StageExecutionState::Failed, blocked(BlockedReason::WaitingForSplits)),
        stage(3, StageExecutionState::Finished, StageExecutionStats::default()),
    ];

    let snapshot = aggregate(&stages);

    assert!(snapshot.is_fully_blocked());
    assert_eq!(
        snapshot.blocked_reasons(),
        &BTreeSet::from([BlockedReason::WaitingForInput, BlockedReason::WaitingForMemory])
    );
    // one stage is still waiting to run
    assert!(!snapshot.is_scheduled());
    assert_eq!(snapshot.progress_percentage(), None);
}

#[test]
fn test_one_unblocked_stage_clears_fully_blocked() {
    let stages = [
        stage(
            0,
            StageExecutionState::Running,
            StageExecutionStats {
                fully_blocked: true,
                ..Default::default()
            },
        ),
        stage(1, StageExecutionState::Running, StageExecutionStats::default()),
    ];
    assert!(!aggregate(&stages).is_fully_blocked());
}

#[test]
fn test_without_root_nothing_is_scheduled_or_blocked() {
    let stats = StageExecutionStats {
        fully_blocked: true,
        total_drivers: 4,
        completed_drivers: 4,
        ..Default::default()
    };
    let stages = [stage(1, StageExecutionState::Finished, stats)];
    let snapshot = QueryStats::aggregate(
        &running_timer(),
        None,
        &stages,
        &PeakMemory::default(),
        &RuntimeStats::new(),
        at(500),
    )
    .unwrap();

    assert!(!snapshot.is_scheduled());
    assert!(!snapshot.is_fully_blocked());
    assert_eq!(snapshot.progress_percentage(), None);
    assert_eq!(snapshot.drivers().total, 4);
    assert_eq!(snapshot.data().output.positions, 0);
}

#[test]
fn test_table_writer_routing_depends_on_fragment() {
    let writer = || {
        let mut writer = operator(0, OperatorType::TableWriter);
        writer.input_positions = 40;
        writer.input_data_size = DataSize::from_bytes(4096);
        writer
    };
    let mut exchange = operator(0, OperatorType::Exchange);
    exchange.raw_input_positions = 40;
    exchange.raw_input_data_size = DataSize::from_bytes(5000);

    let output_stage = planned_stage(
        0,
        FragmentType::TableWriter,
        StageExecutionState::Running,
        StageExecutionStats {
            physical_written_data_size: DataSize::from_bytes(3000),
            output_positions: 1,
            output_data_size: DataSize::from_bytes(8),
            operator_summaries: vec![writer(), exchange],
            ..Default::default()
        },
    );
    let intermediate_stage = planned_stage(
        1,
        FragmentType::Compute,
        StageExecutionState::Running,
        StageExecutionStats {
            physical_written_data_size: DataSize::from_bytes(700),
            processed_input_positions: 12,
            processed_input_data_size: DataSize::from_bytes(96),
            operator_summaries: vec![writer()],
            ..Default::default()
        },
    );

    let snapshot = aggregate(&[output_stage, intermediate_stage]);
    let data = snapshot.data();

    assert_eq!(data.written_output_positions, 40);
    assert_eq!(data.written_output_logical_data_size, DataSize::from_bytes(4096));
    assert_eq!(data.written_output_physical_data_size, DataSize::from_bytes(3000));
    assert_eq!(
        data.written_intermediate_physical_data_size,
        DataSize::from_bytes(700)
    );
    assert_eq!(data.shuffled.positions, 40);
    assert_eq!(data.shuffled.data_size, DataSize::from_bytes(5000));
    assert_eq!(data.processed_input.positions, 12);
    assert_eq!(data.output.positions, 1);
    assert_eq!(data.output.data_size, DataSize::from_bytes(8));
    assert_eq!(snapshot.operator_summaries().len(), 3);
}

#[test]
fn test_stage_without_plan_skips_data_flow() {
    let mut scan = operator(1, OperatorType::ScanFilterAndProject);
    scan.raw_input_positions = 99;
    let stats = StageExecutionStats {
        operator_summaries: vec![scan],
        physical_written_data_size: DataSize::from_bytes(10),
        ..Default::default()
    };

    let snapshot = aggregate(&[stage(1, StageExecutionState::Running, stats)]);

    assert_eq!(snapshot.data().raw_input.positions, 0);
    assert_eq!(snapshot.data().written_intermediate_physical_data_size, DataSize::ZERO);
    // summaries are still carried
    assert_eq!(snapshot.operator_summaries().len(), 1);
}

#[test]
fn test_runtime_metrics_are_prefixed_per_stage() {
    let with_rows = |rows: i64| {
        let mut runtime_stats = RuntimeStats::new();
        runtime_stats
            .add_metric_value("rows", RuntimeUnit::None, rows)
            .unwrap();
        StageExecutionStats {
            runtime_stats,
            ..Default::default()
        }
    };
    let mut query_metrics = RuntimeStats::new();
    query_metrics
        .add_metric_value("optimizerTimeNanos", RuntimeUnit::Nano, 1_500)
        .unwrap();

    let stages = [
        stage(1, StageExecutionState::Running, with_rows(10)),
        stage(2, StageExecutionState::Running, with_rows(32)),
    ];
    let snapshot = QueryStats::aggregate(
        &running_timer(),
        stages.first(),
        &stages,
        &PeakMemory::default(),
        &query_metrics,
        at(1_000),
    )
    .unwrap();

    let metrics = snapshot.runtime_stats();
    assert_eq!(metrics.len(), 3);
    assert_eq!(metrics.get("stage-1-rows").unwrap().sum, 10);
    assert_eq!(metrics.get("stage-2-rows").unwrap().sum, 32);
    assert_eq!(metrics.get("optimizerTimeNanos").unwrap().sum, 1_500);
    assert!(metrics.get("rows").is_none());
}

#[test]
fn test_peaks_and_gc_statistics_are_carried() {
    let gc = StageGcStatistics {
        stage_id: StageId(1),
        tasks: 3,
        full_gc_tasks: 1,
        total_full_gc_sec: 2,
        ..Default::default()
    };
    let stats = StageExecutionStats {
        gc_info: gc,
        ..Default::default()
    };
    let peaks = PeakMemory {
        peak_running_tasks: 12,
        peak_user_memory_reservation: DataSize::from_bytes(1 << 20),
        peak_node_total_memory: DataSize::from_bytes(1 << 30),
        ..Default::default()
    };
    let stages = [stage(1, StageExecutionState::Running, stats)];

    let snapshot = QueryStats::aggregate(
        &running_timer(),
        stages.first(),
        &stages,
        &peaks,
        &RuntimeStats::new(),
        at(1_000),
    )
    .unwrap();

    assert_eq!(snapshot.stage_gc_statistics(), &[gc]);
    assert_eq!(snapshot.tasks().peak_running, 12);
    assert_eq!(
        snapshot.memory().peak_user_memory_reservation,
        DataSize::from_bytes(1 << 20)
    );
    assert_eq!(
        snapshot.memory().peak_node_total_memory,
        DataSize::from_bytes(1 << 30)
    );
}

#[test]
fn test_timeline_comes_from_timer() {
    let snapshot = aggregate(&[stage(
        1,
        StageExecutionState::Running,
        StageExecutionStats::default(),
    )]);

    assert_eq!(snapshot.timeline().create_time, at(0).timestamp_millis());
    assert_eq!(snapshot.timeline().execution_start_time, at(20).timestamp_millis());
    assert_eq!(snapshot.timeline().end_time, None);
    assert_eq!(snapshot.phases().elapsed, Duration::from_millis(1_000));
    assert_eq!(snapshot.phases().total_planning, Duration::from_millis(80));
    assert_eq!(snapshot.phases().execution, Duration::from_millis(980));
}

#[test]
fn test_immediate_failure_snapshot() {
    let snapshot = QueryStats::immediate_failure_at(at(0)).unwrap();
    let timeline = snapshot.timeline();

    assert_eq!(timeline.create_time, timeline.execution_start_time);
    assert_eq!(timeline.create_time, timeline.last_heartbeat);
    assert_eq!(timeline.end_time, Some(timeline.create_time));
    assert!(!snapshot.is_scheduled());
    assert_eq!(snapshot.tasks().total, 0);
    assert_eq!(snapshot.memory().total_allocation, DataSize::ZERO);
    assert!(snapshot.blocked_reasons().is_empty());
    assert!(snapshot.stage_gc_statistics().is_empty());
    assert_eq!(snapshot.spilled_data_size(), DataSize::ZERO);
}
