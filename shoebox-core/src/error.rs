use shoebox_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Metadata codec error: {0}")]
    Codec(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Pipeline is shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ModelError> for PipelineError {
    fn from(err: ModelError) -> Self {
        PipelineError::InvalidInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
