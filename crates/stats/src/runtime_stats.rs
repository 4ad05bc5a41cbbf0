//! Free-form runtime metrics and the rule for merging them across stages.
//!
//! Every metric is a distribution summary (`sum`, `count`, `max`, `min`), so
//! two observations of the same metric always combine without loss: sums and
//! counts add, extremes take the extreme. The rule is the same for every
//! [`RuntimeUnit`]; what differs by unit is only whether two metrics may be
//! combined at all, since a byte count cannot absorb a nanosecond count.

use crate::error::MetricUnitMismatch;
use igloo_common::StageId;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeUnit {
    #[default]
    None,
    Nano,
    Byte,
}

/// Summary of every value recorded under one metric name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMetric {
    pub unit: RuntimeUnit,
    pub sum: i64,
    pub count: u64,
    pub max: i64,
    pub min: i64,
}

impl RuntimeMetric {
    /// A metric holding a single observation.
    pub fn new(unit: RuntimeUnit, value: i64) -> Self {
        Self {
            unit,
            sum: value,
            count: 1,
            max: value,
            min: value,
        }
    }

    /// Combines two summaries of the same metric.
    ///
    /// Returns `None` when the units differ. An empty summary (`count == 0`)
    /// is the identity.
    pub fn combine(&self, other: &Self) -> Option<Self> {
        if self.unit != other.unit {
            return None;
        }
        if self.count == 0 {
            return Some(*other);
        }
        if other.count == 0 {
            return Some(*self);
        }
        Some(Self {
            unit: self.unit,
            sum: self.sum.saturating_add(other.sum),
            count: self.count.saturating_add(other.count),
            max: self.max.max(other.max),
            min: self.min.min(other.min),
        })
    }
}

/// Runtime metrics keyed by name, ordered so that serialization is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeStats {
    metrics: BTreeMap<String, RuntimeMetric>,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn get(&self, name: &str) -> Option<&RuntimeMetric> {
        self.metrics.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RuntimeMetric)> {
        self.metrics.iter().map(|(name, metric)| (name.as_str(), metric))
    }

    /// Records one observation of `name`.
    pub fn add_metric_value(
        &mut self,
        name: &str,
        unit: RuntimeUnit,
        value: i64,
    ) -> Result<(), MetricUnitMismatch> {
        self.merge_metric(name, &RuntimeMetric::new(unit, value))
    }

    /// Merges `metric` into the entry for `name` using [`RuntimeMetric::combine`].
    ///
    /// On a unit conflict the existing entry is left untouched.
    pub fn merge_metric(
        &mut self,
        name: &str,
        metric: &RuntimeMetric,
    ) -> Result<(), MetricUnitMismatch> {
        match self.metrics.entry(name.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(*metric);
                Ok(())
            }
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                match existing.combine(metric) {
                    Some(combined) => {
                        *existing = combined;
                        Ok(())
                    }
                    None => Err(MetricUnitMismatch {
                        name: name.to_string(),
                        existing: existing.unit,
                        incoming: metric.unit,
                    }),
                }
            }
        }
    }

    /// Merges a whole map into this one, reporting the first unit conflict.
    ///
    /// Conflicting entries keep their existing value; the remaining metrics
    /// are still merged.
    pub fn merge(&mut self, other: &Self) -> Result<(), MetricUnitMismatch> {
        let mut first_conflict = None;
        for (name, metric) in &other.metrics {
            if let Err(e) = self.merge_metric(name, metric) {
                first_conflict.get_or_insert(e);
            }
        }
        first_conflict.map_or(Ok(()), Err)
    }

    /// Merges every metric of one stage, renaming each to
    /// [`stage_metric_name`] so that stages never collide.
    pub fn merge_stage(&mut self, stage_id: StageId, stage_metrics: &Self) {
        for (name, metric) in &stage_metrics.metrics {
            if let Err(e) = self.merge_metric(&stage_metric_name(stage_id, name), metric) {
                warn!(stage_id = %stage_id, error = %e, "dropping conflicting runtime metric");
            }
        }
    }
}

/// Query-level name of a metric emitted by one stage.
pub fn stage_metric_name(stage_id: StageId, name: &str) -> String {
    format!("stage-{stage_id}-{name}")
}
