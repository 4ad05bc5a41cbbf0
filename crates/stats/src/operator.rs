//! Operator summaries and the classification of operators into data buckets.

use igloo_common::{DataSize, Duration, StageId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of an operator, as far as statistics routing is concerned.
///
/// Only the roles that feed a bucket are named; everything else is kept
/// verbatim in [`OperatorType::Other`]. Build values from a name with
/// `OperatorType::from`, which always picks the named role when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperatorType {
    Exchange,
    Merge,
    TableScan,
    ScanFilterAndProject,
    TableWriter,
    Other(OtherOperator),
}

/// Name of an operator without a statistics role.
///
/// Only produced by `OperatorType::from`, so it never holds a name that
/// maps to one of the named roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OtherOperator(String);

impl OtherOperator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Query-level total an operator's counters are routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputBucket {
    /// Data read from another stage (raw input counters).
    Shuffled,
    /// Data read from a table (raw input counters).
    RawInput,
    /// Rows persisted to the query's destination table (plain input counters).
    WrittenOutput,
}

impl OperatorType {
    pub fn name(&self) -> &str {
        match self {
            Self::Exchange => "ExchangeOperator",
            Self::Merge => "MergeOperator",
            Self::TableScan => "TableScanOperator",
            Self::ScanFilterAndProject => "ScanFilterAndProjectOperator",
            Self::TableWriter => "TableWriterOperator",
            Self::Other(other) => other.as_str(),
        }
    }

    /// The bucket this operator feeds, if any.
    ///
    /// A table writer only produces query output when it runs in the output
    /// table-writer fragment; elsewhere its writes are intermediate and are
    /// accounted through the stage's physical written bytes instead.
    pub fn input_bucket(&self, output_table_writer_fragment: bool) -> Option<InputBucket> {
        match self {
            Self::Exchange | Self::Merge => Some(InputBucket::Shuffled),
            Self::TableScan | Self::ScanFilterAndProject => Some(InputBucket::RawInput),
            Self::TableWriter if output_table_writer_fragment => Some(InputBucket::WrittenOutput),
            Self::TableWriter | Self::Other(_) => None,
        }
    }
}

impl From<String> for OperatorType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "ExchangeOperator" => Self::Exchange,
            "MergeOperator" => Self::Merge,
            "TableScanOperator" => Self::TableScan,
            "ScanFilterAndProjectOperator" => Self::ScanFilterAndProject,
            "TableWriterOperator" => Self::TableWriter,
            _ => Self::Other(OtherOperator(name)),
        }
    }
}

impl From<&str> for OperatorType {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<OperatorType> for String {
    fn from(operator_type: OperatorType) -> Self {
        match operator_type {
            OperatorType::Other(OtherOperator(name)) => name,
            known => known.name().to_string(),
        }
    }
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters of one operator instance, summed over every driver of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorStats {
    pub stage_id: StageId,
    pub pipeline_id: u32,
    pub operator_id: u32,
    pub plan_node_id: String,
    pub operator_type: OperatorType,
    pub total_drivers: u64,

    pub input_data_size: DataSize,
    pub input_positions: u64,
    pub raw_input_data_size: DataSize,
    pub raw_input_positions: u64,
    pub output_data_size: DataSize,
    pub output_positions: u64,
    pub physical_written_data_size: DataSize,

    pub add_input_cpu: Duration,
    pub get_output_cpu: Duration,
    pub blocked_wall: Duration,

    pub spilled_data_size: DataSize,
    pub peak_user_memory_reservation: DataSize,
    pub peak_total_memory_reservation: DataSize,
}

impl Default for OperatorStats {
    fn default() -> Self {
        Self {
            stage_id: StageId(0),
            pipeline_id: 0,
            operator_id: 0,
            plan_node_id: String::new(),
            operator_type: OperatorType::Other(OtherOperator(String::new())),
            total_drivers: 0,
            input_data_size: DataSize::ZERO,
            input_positions: 0,
            raw_input_data_size: DataSize::ZERO,
            raw_input_positions: 0,
            output_data_size: DataSize::ZERO,
            output_positions: 0,
            physical_written_data_size: DataSize::ZERO,
            add_input_cpu: Duration::ZERO,
            get_output_cpu: Duration::ZERO,
            blocked_wall: Duration::ZERO,
            spilled_data_size: DataSize::ZERO,
            peak_user_memory_reservation: DataSize::ZERO,
            peak_total_memory_reservation: DataSize::ZERO,
        }
    }
}

impl OperatorStats {
    pub fn new(stage_id: StageId, operator_id: u32, operator_type: OperatorType) -> Self {
        Self {
            stage_id,
            operator_id,
            operator_type,
            ..Default::default()
        }
    }
}
