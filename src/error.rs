use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

impl TsError {
    pub(crate) fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        TsError::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Configuration errors are reported before any packet moves.
    pub fn is_config(&self) -> bool {
        matches!(self, TsError::Config(_) | TsError::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, TsError>;
