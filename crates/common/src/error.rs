use thiserror::Error;

/// Unified error type for Igloo crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid data size '{input}': {reason}")]
    InvalidDataSize { input: String, reason: &'static str },
    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
