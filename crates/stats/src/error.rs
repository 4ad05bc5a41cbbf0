use crate::runtime_stats::RuntimeUnit;
use thiserror::Error;

/// A snapshot field failed validation on construction.
///
/// This is a programmer error in whoever assembled the inputs; it is surfaced,
/// never corrected.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("invalid query stats: {field} {reason}")]
pub struct InvalidQueryStats {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidQueryStats {
    pub(crate) fn negative(field: &'static str, value: impl std::fmt::Display) -> Self {
        Self {
            field,
            reason: format!("is negative ({value})"),
        }
    }

    pub(crate) fn not_finite(field: &'static str, value: f64) -> Self {
        Self {
            field,
            reason: format!("is not finite ({value})"),
        }
    }

    pub(crate) fn out_of_range(field: &'static str, value: impl std::fmt::Display) -> Self {
        Self {
            field,
            reason: format!("is out of range ({value})"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("runtime metric '{name}' is recorded in {existing:?} and cannot absorb a value in {incoming:?}")]
pub struct MetricUnitMismatch {
    pub name: String,
    pub existing: RuntimeUnit,
    pub incoming: RuntimeUnit,
}
