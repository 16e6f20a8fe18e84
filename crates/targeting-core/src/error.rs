use thiserror::Error;

#[derive(Error, Debug)]
pub enum TargetingError {
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Model service error: {0}")]
    ModelService(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stage {stage} exhausted: {reason}")]
    StageExhausted { stage: u8, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,
}
