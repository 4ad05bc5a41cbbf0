use igloo_common::StageId;
use igloo_stats::InvalidQueryStats;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Failed to load configuration")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Stats(#[from] InvalidQueryStats),

    #[error("Stage ID not found: {0}")]
    UnknownStage(StageId),

    #[error("An internal error occurred: {0}")]
    Internal(String),
}

pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;
