//! Compiled plan fragment metadata a stage carries once planning is done.

use igloo_common::{PlanFragmentId, StageId};
use serde::{Deserialize, Serialize};

/// Type of plan fragment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FragmentType {
    Scan,        // Reads tables
    Join,        // Joins its inputs
    #[default]
    Compute,     // General computation (projection, filter, aggregation)
    Shuffle,     // Data redistribution
    TableWriter, // Persists rows into the query's destination table
}

/// The part of a plan fragment the statistics rollup needs to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFragment {
    pub id: PlanFragmentId,
    #[serde(default)]
    pub fragment_type: FragmentType,
    #[serde(default)]
    pub dependencies: Vec<StageId>, // Stages this fragment reads from
}

impl PlanFragment {
    pub fn new(id: PlanFragmentId, fragment_type: FragmentType, dependencies: Vec<StageId>) -> Self {
        Self {
            id,
            fragment_type,
            dependencies,
        }
    }

    /// Whether this fragment writes the query's final output table.
    ///
    /// Writes of this fragment are query output; writes of every other
    /// fragment are intermediate.
    pub fn is_output_table_writer_fragment(&self) -> bool {
        self.fragment_type == FragmentType::TableWriter
    }
}
