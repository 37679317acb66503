use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised before or while driving a pipeline.
///
/// A stage exiting non-zero is not an error at this level; it is reported in
/// [`crate::PipelineResult`] so the caller can decide which stage to blame.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("invalid command `{command}`: {reason}")]
    InvalidCommand { command: String, reason: String },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
