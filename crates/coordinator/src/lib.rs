pub mod commands;
pub mod config;
pub mod dump;
pub mod error;
pub mod peaks;
pub mod reporter;
pub mod stage;
pub mod tracker;

pub use dump::{PhaseStart, QueryDump};
pub use error::{CoordinatorError, Result};
pub use peaks::PeakMemoryTracker;
pub use reporter::{ProgressReporter, SnapshotReceiver};
pub use stage::StageHandle;
pub use tracker::QueryTracker;
