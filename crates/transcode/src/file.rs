//! Single-file transcoding.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use process_utils::ProcessPipeline;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Phase, Result};
use crate::format::AudioProperties;
use crate::plan::{CommandPlanner, TranscodeJob};
use crate::tagging::{MetadataBackend, TagCheck};

/// Removes a destination file unless the transcode that writes it succeeded.
#[derive(Debug)]
pub struct DestinationGuard {
    path: PathBuf,
    armed: bool,
}

impl DestinationGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    /// Keep the file.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed partial output {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove partial output {}: {}", self.path.display(), e),
        }
    }
}

/// Transcodes exactly one file: decode, encode, copy tags, check tags.
pub struct FileTranscoder {
    backend: Arc<dyn MetadataBackend>,
    planner: Arc<dyn CommandPlanner>,
    pipeline: ProcessPipeline,
}

impl FileTranscoder {
    pub fn new(
        backend: Arc<dyn MetadataBackend>,
        planner: Arc<dyn CommandPlanner>,
        pipeline: ProcessPipeline,
    ) -> Self {
        Self {
            backend,
            planner,
            pipeline,
        }
    }

    /// Read the audio properties of `path` on the blocking pool.
    pub async fn read_properties(&self, path: &Path) -> Result<AudioProperties> {
        let backend = Arc::clone(&self.backend);
        let path = path.to_path_buf();
        blocking(move || backend.read_properties(&path)).await
    }

    /// Transcode `job.source_path` into `job.dest_path`.
    ///
    /// Cancelling `token` kills the running pipeline. On every error path the
    /// destination file is removed again.
    pub async fn transcode(&self, job: &TranscodeJob, token: &CancellationToken) -> Result<()> {
        let source = &job.source_path;
        let props = self.read_properties(source).await?;
        if props.channels > 2 {
            return Err(Error::MultichannelUnsupported {
                path: source.clone(),
                channels: props.channels,
            });
        }

        let commands = self.planner.plan(job, &props)?;

        if let Some(parent) = job.dest_path.parent() {
            // Sibling workers may create the same directory; that is not an error.
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_path("creating", parent, e))?;
        }

        let guard = DestinationGuard::new(&job.dest_path);
        debug!(
            "transcoding {} -> {} ({})",
            source.display(),
            job.dest_path.display(),
            job.format
        );

        let result = self.pipeline.run(commands.as_slice(), token).await?;
        if let Some((index, stage)) = result.failed_stage() {
            let phase = if index + 1 < result.stages.len() {
                Phase::Decode
            } else {
                Phase::Encode
            };
            return Err(Error::PipelineStageFailed {
                path: source.clone(),
                phase,
                command: stage.command.clone(),
                exit: stage.exit.to_string(),
                stderr: stage.stderr.trim().to_string(),
            });
        }

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let backend = Arc::clone(&self.backend);
        let (src, dst) = (source.clone(), job.dest_path.clone());
        blocking(move || backend.copy_tags(&src, &dst)).await?;

        let backend = Arc::clone(&self.backend);
        let dst = job.dest_path.clone();
        let check = blocking(move || Ok(backend.check_tags(&dst))).await?;
        if let TagCheck::Invalid(reason) = check {
            return Err(Error::TagCheckFailed {
                path: job.dest_path.clone(),
                reason,
            });
        }

        guard.disarm();
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("metadata task failed: {}", e)))?
}
