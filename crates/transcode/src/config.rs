//! Release transcoder configuration.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::Toolchain;

/// Default bounded wait for workers to return after an abort.
pub const DEFAULT_UNWIND_TIMEOUT_SECS: u64 = 10;

/// Configuration for [`ReleaseTranscoder`](crate::ReleaseTranscoder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Directory the release directory is created in.
    /// Defaults to the source release's parent directory.
    pub output_dir: Option<PathBuf>,
    /// Maximum number of files transcoded at once.
    /// Defaults to the number of logical CPUs.
    pub max_workers: Option<usize>,
    /// Per-file time limit. No limit when unset.
    pub job_timeout_secs: Option<u64>,
    /// How long workers get to return after the run was aborted.
    pub unwind_timeout_secs: u64,
    pub tools: Toolchain,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_workers: None,
            job_timeout_secs: None,
            unwind_timeout_secs: DEFAULT_UNWIND_TIMEOUT_SECS,
            tools: Toolchain::default(),
        }
    }
}

impl TranscodeConfig {
    /// Effective worker count, never zero.
    pub fn workers(&self) -> usize {
        match self.max_workers {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn unwind_timeout(&self) -> Duration {
        Duration::from_secs(self.unwind_timeout_secs)
    }
}
