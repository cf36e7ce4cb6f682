use thiserror::Error;

/// Errors produced while assembling chains or configuring the pipeline.
///
/// Stage-level failures never surface here: they are recorded on the
/// [`Record`](crate::record::Record) as diagnostics instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A chain was requested from zero stages.
    #[error("cannot build a chain from zero stages")]
    EmptyChain,

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure inside a stage's `apply`.
///
/// Returned to the orchestrator, which records it as an error diagnostic
/// tagged with the stage name and moves on to the next stage.
#[derive(Error, Debug)]
pub enum StageError {
    /// The record does not carry the input this stage needs.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A single field could not be processed.
    #[error("field '{field}': {message}")]
    Field { field: String, message: String },

    /// The requested operation or format is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A configuration block failed to deserialize.
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other stage failures.
    #[error("{0}")]
    Other(String),
}

impl StageError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        StageError::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;
