use igloo_common::DataSize;
use igloo_stats::PeakMemory;
use parking_lot::Mutex;

/// Running maxima of a query's resource usage. Values only ever grow.
#[derive(Debug, Default)]
pub struct PeakMemoryTracker {
    peaks: Mutex<PeakMemory>,
}

impl PeakMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_running_tasks(&self, running_tasks: u32) {
        let mut peaks = self.peaks.lock();
        peaks.peak_running_tasks = peaks.peak_running_tasks.max(running_tasks);
    }

    /// Query-wide reservation, summed over every stage.
    pub fn record_query_memory(&self, user: DataSize, total: DataSize) {
        let mut peaks = self.peaks.lock();
        peaks.peak_user_memory_reservation = peaks.peak_user_memory_reservation.max(user);
        peaks.peak_total_memory_reservation = peaks.peak_total_memory_reservation.max(total);
    }

    /// Memory held by a single task.
    pub fn record_task_memory(&self, user: DataSize, total: DataSize) {
        let mut peaks = self.peaks.lock();
        peaks.peak_task_user_memory = peaks.peak_task_user_memory.max(user);
        peaks.peak_task_total_memory = peaks.peak_task_total_memory.max(total);
    }

    /// Memory held by the query on a single worker node.
    pub fn record_node_memory(&self, total: DataSize) {
        let mut peaks = self.peaks.lock();
        peaks.peak_node_total_memory = peaks.peak_node_total_memory.max(total);
    }

    /// Folds externally observed peaks into these.
    pub fn record_peaks(&self, other: &PeakMemory) {
        self.record_running_tasks(other.peak_running_tasks);
        self.record_query_memory(
            other.peak_user_memory_reservation,
            other.peak_total_memory_reservation,
        );
        self.record_task_memory(other.peak_task_user_memory, other.peak_task_total_memory);
        self.record_node_memory(other.peak_node_total_memory);
    }

    pub fn peaks(&self) -> PeakMemory {
        *self.peaks.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_never_decrease() {
        let tracker = PeakMemoryTracker::new();
        tracker.record_running_tasks(4);
        tracker.record_running_tasks(2);
        tracker.record_query_memory(DataSize::from_bytes(100), DataSize::from_bytes(300));
        tracker.record_query_memory(DataSize::from_bytes(200), DataSize::from_bytes(250));
        tracker.record_node_memory(DataSize::from_bytes(64));

        let peaks = tracker.peaks();
        assert_eq!(peaks.peak_running_tasks, 4);
        assert_eq!(peaks.peak_user_memory_reservation, DataSize::from_bytes(200));
        assert_eq!(peaks.peak_total_memory_reservation, DataSize::from_bytes(300));
        assert_eq!(peaks.peak_node_total_memory, DataSize::from_bytes(64));
        assert_eq!(peaks.peak_task_user_memory, DataSize::ZERO);
    }

    #[test]
    fn test_record_peaks_merges_maxima() {
        let tracker = PeakMemoryTracker::new();
        tracker.record_task_memory(DataSize::from_bytes(10), DataSize::from_bytes(20));
        tracker.record_peaks(&PeakMemory {
            peak_running_tasks: 3,
            peak_task_user_memory: DataSize::from_bytes(5),
            peak_task_total_memory: DataSize::from_bytes(40),
            ..Default::default()
        });

        let peaks = tracker.peaks();
        assert_eq!(peaks.peak_running_tasks, 3);
        assert_eq!(peaks.peak_task_user_memory, DataSize::from_bytes(10));
        assert_eq!(peaks.peak_task_total_memory, DataSize::from_bytes(40));
    }
}
