//! FLAC release transcoding.
//!
//! A release is a directory tree of FLAC files plus artwork, logs and other
//! small files. [`ReleaseTranscoder`] converts a whole release into one
//! [`TargetFormat`], running one decoder/encoder pipeline per file on a
//! bounded worker pool, and guarantees that a failed or cancelled run leaves
//! neither an output directory nor a running subprocess behind.
//!
//! ```no_run
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//! use whatbetter_transcode::{ReleaseTranscoder, TargetFormat, TranscodeConfig};
//!
//! # async fn example() -> whatbetter_transcode::Result<()> {
//! let transcoder = ReleaseTranscoder::new(TranscodeConfig::default());
//! let outcome = transcoder
//!     .run(
//!         Path::new("/music/Artist - Album [FLAC]"),
//!         TargetFormat::Mp3V0,
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{}", outcome.path().display());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod discover;
pub mod error;
pub mod file;
pub mod format;
pub mod naming;
pub mod plan;
pub mod release;
pub mod tagging;

pub use config::TranscodeConfig;
pub use coordinator::AbortCoordinator;
pub use discover::{ReleaseFiles, discover};
pub use error::{Error, Phase, Result};
pub use file::{DestinationGuard, FileTranscoder};
pub use format::{AudioProperties, TargetFormat};
pub use plan::{
    CommandPlanner, Resample, Toolchain, TranscodeJob, allowed_formats, decide_resample,
};
pub use release::{FileReport, ReleaseProfile, ReleaseReport, ReleaseTranscoder, TranscodeOutcome};
pub use tagging::{LoftyBackend, MetadataBackend, TagCheck};
