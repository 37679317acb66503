//! Transcoding error types.

use std::path::{Path, PathBuf};

use process_utils::PipelineError;
use thiserror::Error;

/// Transcoding result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The part of a single-file transcode that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Decode,
    Encode,
    TagCopy,
    TagCheck,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Decode => write!(f, "decode"),
            Phase::Encode => write!(f, "encode"),
            Phase::TagCopy => write!(f, "tag-copy"),
            Phase::TagCheck => write!(f, "tag-check"),
        }
    }
}

/// Transcoding error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{} has {channels} channels; multichannel releases are not supported", .path.display())]
    MultichannelUnsupported { path: PathBuf, channels: u8 },

    #[error("{} has a sample rate of {sample_rate} Hz, which is not a multiple of 44100 or 48000", .path.display())]
    UnknownSampleRate { path: PathBuf, sample_rate: u32 },

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("{phase} failed for {}: `{command}` ended with {exit}: {stderr}", .path.display())]
    PipelineStageFailed {
        path: PathBuf,
        phase: Phase,
        command: String,
        exit: String,
        stderr: String,
    },

    #[error("copying tags to {} failed: {reason}", .path.display())]
    TagCopyFailed { path: PathBuf, reason: String },

    #[error("tag check failed for {}: {reason}", .path.display())]
    TagCheckFailed { path: PathBuf, reason: String },

    #[error("transcode cancelled")]
    Cancelled,

    #[error("transcoding {} timed out", .0.display())]
    JobTimedOut(PathBuf),

    #[error("cannot read audio properties of {}: {reason}", .path.display())]
    Metadata { path: PathBuf, reason: String },

    #[error("no FLAC files found in {}", .0.display())]
    NoAudioFiles(PathBuf),

    #[error("pipeline error: {0}")]
    Pipeline(PipelineError),

    #[error("IO error while {op} {}: {source}", .path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} and {} would both be written to {}", .first.display(), .second.display(), .path.display())]
    DuplicateDestination {
        path: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("{source}; removing {} also failed: {reason}", .path.display())]
    RollbackFailed {
        path: PathBuf,
        reason: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn metadata(path: &Path, reason: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// The single-file phase this error belongs to, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::PipelineStageFailed { phase, .. } => Some(*phase),
            Error::TagCopyFailed { .. } => Some(Phase::TagCopy),
            Error::TagCheckFailed { .. } => Some(Phase::TagCheck),
            Error::RollbackFailed { source, .. } => source.phase(),
            _ => None,
        }
    }

    /// Whether this job was stopped rather than failing on its own.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::RollbackFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<PipelineError> for Error {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Cancelled => Error::Cancelled,
            other => Error::Pipeline(other),
        }
    }
}
