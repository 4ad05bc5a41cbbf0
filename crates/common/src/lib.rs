//! Common crate
//!
//! Shared identifiers, unit types, and error handling for Igloo.
//!
//! # Example
//! ```rust
//! use igloo_common::units::DataSize;
//! let size: DataSize = "2kB".parse().unwrap();
//! assert_eq!(size.bytes(), 2048);
//! assert_eq!(size.to_string(), "2kB");
//! ```

pub mod error;
pub mod ids;
pub mod units;

pub use error::{Error, Result};
pub use ids::{PlanFragmentId, QueryId, StageId};
pub use units::{DataSize, Duration};
