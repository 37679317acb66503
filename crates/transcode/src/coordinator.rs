//! Abort and rollback of a release run.
//!
//! Workers report failures to an [`AbortCoordinator`]. The first error is
//! kept; every later one is only logged. Reporting an error cancels the
//! run's token, which kills every pipeline still running, and the output
//! directory is removed by a single cleanup pass no matter how many callers
//! ask for it. A cleanup pass that cannot remove the directory reports the
//! reason to every caller.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;

#[derive(Debug)]
pub struct AbortCoordinator {
    output_dir: PathBuf,
    token: CancellationToken,
    aborting: AtomicBool,
    first_error: Mutex<Option<Error>>,
    /// Outcome of the cleanup pass: the failure reason, if any.
    cleanup: OnceCell<Option<String>>,
}

impl AbortCoordinator {
    /// `parent` is the caller's token; cancelling it aborts the run, but an
    /// internal failure never cancels it.
    pub fn new(output_dir: impl Into<PathBuf>, parent: &CancellationToken) -> Self {
        Self {
            output_dir: output_dir.into(),
            token: parent.child_token(),
            aborting: AtomicBool::new(false),
            first_error: Mutex::new(None),
            cleanup: OnceCell::new(),
        }
    }

    /// Token handed to every worker's pipeline.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Whether no further jobs may start.
    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::Acquire) || self.token.is_cancelled()
    }

    /// Stop the run: no new jobs start and running pipelines are killed.
    pub fn abort(&self) {
        if !self.aborting.swap(true, Ordering::AcqRel) {
            debug!("aborting run for {}", self.output_dir.display());
        }
        self.token.cancel();
    }

    /// Report a failed job. Returns whether this was the first error.
    pub fn fail(&self, source: &Path, err: Error) -> bool {
        let first = {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                if !err.is_cancelled() {
                    warn!("transcoding {} failed: {}", source.display(), err);
                }
                *slot = Some(err);
                true
            } else {
                if err.is_cancelled() {
                    debug!("{} stopped after abort", source.display());
                } else {
                    warn!("transcoding {} also failed: {}", source.display(), err);
                }
                false
            }
        };
        self.abort();
        first
    }

    /// Remove the first recorded error.
    pub fn take_error(&self) -> Option<Error> {
        self.first_error.lock().take()
    }

    /// Remove the output directory. Runs once; concurrent callers wait for
    /// the same pass to finish and all see its outcome.
    pub async fn cleanup(&self) -> Result<(), String> {
        let failure = self
            .cleanup
            .get_or_init(|| async {
                match tokio::fs::remove_dir_all(&self.output_dir).await {
                    Ok(()) => {
                        info!("removed incomplete output {}", self.output_dir.display());
                        None
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        error!(
                            "failed to remove incomplete output {}: {}",
                            self.output_dir.display(),
                            e
                        );
                        Some(e.to_string())
                    }
                }
            })
            .await;

        match failure {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    /// Abort, clean up, and return `err`, wrapped if the cleanup failed.
    pub async fn roll_back(&self, err: Error) -> Error {
        self.abort();
        match self.cleanup().await {
            Ok(()) => err,
            Err(reason) => Error::RollbackFailed {
                path: self.output_dir.clone(),
                reason,
                source: Box::new(err),
            },
        }
    }

    pub fn cleaned_up(&self) -> bool {
        self.cleanup.initialized()
    }
}
