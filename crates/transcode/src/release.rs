//! Whole-release transcoding.
//!
//! A run is all-or-nothing: it either returns a fully populated output
//! directory or removes whatever it created before returning the first error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use process_utils::{ProcessPipeline, ProcessTracker};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TranscodeConfig;
use crate::coordinator::AbortCoordinator;
use crate::discover::{ReleaseFiles, discover};
use crate::error::{Error, Result};
use crate::file::FileTranscoder;
use crate::format::{AudioProperties, TargetFormat};
use crate::naming::{mirrored_path, transcode_dir_name, transcoded_path};
use crate::plan::{CommandPlanner, TranscodeJob, needs_resample, resample_rate};
use crate::tagging::{LoftyBackend, MetadataBackend};

/// Release-wide decisions, computed once before any output is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseProfile {
    /// Some file exceeds 16 bit or 48 kHz.
    pub needs_resample: bool,
    /// Rate of the first file that needs resampling, if it maps to a standard rate.
    pub target_sample_rate: Option<u32>,
    pub has_multichannel: bool,
}

impl ReleaseProfile {
    /// Summarise the properties of every audio file of a release.
    pub fn compute(files: &[(PathBuf, AudioProperties)]) -> Self {
        let first_resampled = files.iter().find(|(_, props)| needs_resample(props));
        Self {
            needs_resample: first_resampled.is_some(),
            target_sample_rate: first_resampled.and_then(|(_, p)| resample_rate(p.sample_rate)),
            has_multichannel: files.iter().any(|(_, props)| props.channels > 2),
        }
    }

    /// Compute the profile and reject releases that can never be transcoded.
    ///
    /// Multichannel audio is checked first. When the release is resampled,
    /// every file's rate must map to 44100 or 48000.
    pub fn preflight(files: &[(PathBuf, AudioProperties)]) -> Result<Self> {
        let profile = Self::compute(files);

        if let Some((path, props)) = files.iter().find(|(_, props)| props.channels > 2) {
            return Err(Error::MultichannelUnsupported {
                path: path.clone(),
                channels: props.channels,
            });
        }
        if profile.needs_resample {
            for (path, props) in files {
                if resample_rate(props.sample_rate).is_none() {
                    return Err(Error::UnknownSampleRate {
                        path: path.clone(),
                        sample_rate: props.sample_rate,
                    });
                }
            }
        }

        Ok(profile)
    }

    /// Whether transcoding to `format` would reproduce the source.
    pub fn is_noop(&self, format: TargetFormat) -> bool {
        format.is_lossless() && !self.needs_resample
    }

    fn resample_suffix_rate(&self) -> Option<u32> {
        if self.needs_resample {
            self.target_sample_rate
        } else {
            None
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// A new directory was written.
    Transcoded(PathBuf),
    /// The source is already in the requested format; nothing was written.
    AlreadyInFormat(PathBuf),
}

impl TranscodeOutcome {
    pub fn path(&self) -> &Path {
        match self {
            TranscodeOutcome::Transcoded(path) | TranscodeOutcome::AlreadyInFormat(path) => path,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, TranscodeOutcome::Transcoded(_))
    }
}

/// Audio file entry of a [`ReleaseReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub properties: AudioProperties,
}

/// What a run would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    pub source: PathBuf,
    pub audio_files: Vec<FileReport>,
    pub ancillary_files: Vec<PathBuf>,
    pub profile: ReleaseProfile,
}

impl ReleaseReport {
    /// Name of the directory a run for `format` would create.
    pub fn output_dir_name(&self, format: TargetFormat) -> Option<String> {
        let name = self.source.file_name()?.to_string_lossy();
        Some(transcode_dir_name(
            &name,
            format,
            self.profile.resample_suffix_rate(),
        ))
    }
}

/// Transcodes a release directory into one target format.
pub struct ReleaseTranscoder {
    config: TranscodeConfig,
    files: Arc<FileTranscoder>,
    tracker: Arc<ProcessTracker>,
}

impl ReleaseTranscoder {
    /// Transcoder using `lofty` for metadata and the configured executables.
    pub fn new(config: TranscodeConfig) -> Self {
        let planner = Arc::new(config.tools.clone());
        Self::with_collaborators(config, Arc::new(LoftyBackend::new()), planner)
    }

    pub fn with_collaborators(
        config: TranscodeConfig,
        backend: Arc<dyn MetadataBackend>,
        planner: Arc<dyn CommandPlanner>,
    ) -> Self {
        let tracker = Arc::new(ProcessTracker::new());
        let pipeline = ProcessPipeline::with_tracker(Arc::clone(&tracker));
        Self {
            config,
            files: Arc::new(FileTranscoder::new(backend, planner, pipeline)),
            tracker,
        }
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    /// Process groups of the pipelines currently running.
    pub fn tracker(&self) -> &Arc<ProcessTracker> {
        &self.tracker
    }

    /// Discover a release and compute its profile.
    pub async fn inspect(&self, source_dir: &Path) -> Result<ReleaseReport> {
        let source = resolve_source(source_dir).await?;
        let files = discover_release(&source).await?;
        let properties = self.read_all(&files.audio).await?;
        let profile = ReleaseProfile::compute(&properties);
        Ok(ReleaseReport {
            source,
            audio_files: properties
                .into_iter()
                .map(|(path, properties)| FileReport { path, properties })
                .collect(),
            ancillary_files: files.ancillary,
            profile,
        })
    }

    /// Transcode the release at `source_dir` into `format`.
    ///
    /// Cancelling `cancel` aborts the run and rolls it back; the error is then
    /// [`Error::Cancelled`].
    pub async fn run(
        &self,
        source_dir: &Path,
        format: TargetFormat,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutcome> {
        let source = resolve_source(source_dir).await?;
        let files = discover_release(&source).await?;
        let properties = self.read_all(&files.audio).await?;
        let profile = ReleaseProfile::preflight(&properties)?;

        if profile.is_noop(format) {
            info!(
                "{} is already {} at a supported rate, nothing to do",
                source.display(),
                format
            );
            return Ok(TranscodeOutcome::AlreadyInFormat(source));
        }

        let output_dir = self.output_dir_for(&source, format, &profile)?;
        let jobs = build_jobs(&files, &output_dir, format, &profile)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        create_output_dir(&output_dir).await?;
        info!(
            "transcoding {} files from {} to {} ({}{})",
            files.audio.len(),
            source.display(),
            output_dir.display(),
            format,
            profile
                .target_sample_rate
                .filter(|_| profile.needs_resample)
                .map(|rate| format!(", resampling to {} Hz", rate))
                .unwrap_or_default()
        );

        let coordinator = Arc::new(AbortCoordinator::new(&output_dir, cancel));
        let mut result = self.transcode_all(jobs, &coordinator).await;
        if result.is_ok() {
            result = copy_ancillary(&files, &output_dir, coordinator.token()).await;
        }

        match result {
            Ok(()) => {
                info!("finished {}", output_dir.display());
                Ok(TranscodeOutcome::Transcoded(output_dir))
            }
            Err(e) => Err(coordinator.roll_back(e).await),
        }
    }

    fn output_dir_for(
        &self,
        source: &Path,
        format: TargetFormat,
        profile: &ReleaseProfile,
    ) -> Result<PathBuf> {
        let name = source
            .file_name()
            .ok_or_else(|| Error::Other(format!("{} has no directory name", source.display())))?
            .to_string_lossy();
        let parent = match &self.config.output_dir {
            Some(dir) => dir.as_path(),
            None => source.parent().unwrap_or_else(|| Path::new(".")),
        };
        Ok(parent.join(transcode_dir_name(
            &name,
            format,
            profile.resample_suffix_rate(),
        )))
    }

    async fn read_all(&self, audio: &[PathBuf]) -> Result<Vec<(PathBuf, AudioProperties)>> {
        let mut properties = Vec::with_capacity(audio.len());
        for path in audio {
            let props = self.files.read_properties(path).await?;
            debug!(
                "{}: {} Hz, {} bit, {} channels",
                path.display(),
                props.sample_rate,
                props.bits_per_sample,
                props.channels
            );
            properties.push((path.clone(), props));
        }
        Ok(properties)
    }

    async fn transcode_all(
        &self,
        jobs: Vec<TranscodeJob>,
        coordinator: &Arc<AbortCoordinator>,
    ) -> Result<()> {
        let total = jobs.len();
        let workers = self.config.workers();
        let job_timeout = self.config.job_timeout();
        let semaphore = Arc::new(Semaphore::new(workers));
        let done = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        debug!("starting {} jobs on {} workers", total, workers);

        for job in jobs {
            let transcoder = Arc::clone(&self.files);
            let coordinator = Arc::clone(coordinator);
            let semaphore = Arc::clone(&semaphore);
            let done = Arc::clone(&done);

            tasks.spawn(async move {
                let token = coordinator.token().clone();
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                if coordinator.is_aborting() {
                    return;
                }

                let result = match job_timeout {
                    Some(limit) => {
                        match tokio::time::timeout(limit, transcoder.transcode(&job, &token)).await {
                            Ok(result) => result,
                            Err(_) => Err(Error::JobTimedOut(job.source_path.clone())),
                        }
                    }
                    None => transcoder.transcode(&job, &token).await,
                };

                match result {
                    Ok(()) => {
                        let finished = done.fetch_add(1, Ordering::AcqRel) + 1;
                        info!(
                            "[{}/{}] {}",
                            finished,
                            total,
                            job.dest_path.display()
                        );
                    }
                    Err(e) => {
                        coordinator.fail(&job.source_path, e);
                    }
                }
            });
        }

        let finished = tokio::select! {
            _ = drain(&mut tasks, coordinator) => true,
            _ = coordinator.token().cancelled() => false,
        };
        if !finished {
            let unwind = self.config.unwind_timeout();
            debug!(
                "run aborted, waiting up to {:?} for {} workers",
                unwind,
                tasks.len()
            );
            if tokio::time::timeout(unwind, drain(&mut tasks, coordinator))
                .await
                .is_err()
            {
                warn!(
                    "{} workers did not stop within {:?}, aborting them",
                    tasks.len(),
                    unwind
                );
                tasks.shutdown().await;
            }
        }

        let live = self.tracker.live_groups();
        if !live.is_empty() {
            warn!("{} process groups still registered after unwind", live.len());
        }

        if let Some(e) = coordinator.take_error() {
            return Err(e);
        }
        if coordinator.is_aborting() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

async fn drain(tasks: &mut JoinSet<()>, coordinator: &AbortCoordinator) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                coordinator.fail(
                    coordinator.output_dir(),
                    Error::Other(format!("transcode worker panicked: {}", e)),
                );
            }
        }
    }
}

/// One job per audio file, in discovery order.
///
/// Distinct sources whose sanitized names map to the same destination are
/// rejected, since their workers would overwrite each other's output.
fn build_jobs(
    files: &ReleaseFiles,
    output_dir: &Path,
    format: TargetFormat,
    profile: &ReleaseProfile,
) -> Result<Vec<TranscodeJob>> {
    let mut claimed: HashMap<PathBuf, &Path> = HashMap::with_capacity(files.audio.len());
    let mut jobs = Vec::with_capacity(files.audio.len());

    for source in &files.audio {
        let dest_path = transcoded_path(&files.root, output_dir, source, format);
        if let Some(first) = claimed.insert(dest_path.clone(), source) {
            return Err(Error::DuplicateDestination {
                path: dest_path,
                first: first.to_path_buf(),
                second: source.clone(),
            });
        }
        jobs.push(TranscodeJob {
            source_path: source.clone(),
            dest_path,
            format,
            resample: profile.needs_resample,
        });
    }
    Ok(jobs)
}

async fn resolve_source(source_dir: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(source_dir)
        .await
        .map_err(|e| Error::io_path("resolving", source_dir, e))
}

async fn discover_release(source: &Path) -> Result<ReleaseFiles> {
    let root = source.to_path_buf();
    let files = tokio::task::spawn_blocking(move || discover(&root))
        .await
        .map_err(|e| Error::Other(format!("discovery task failed: {}", e)))??;
    if files.audio.is_empty() {
        return Err(Error::NoAudioFiles(source.to_path_buf()));
    }
    Ok(files)
}

/// Create the release output directory. It must not exist yet.
async fn create_output_dir(output_dir: &Path) -> Result<()> {
    if let Some(parent) = output_dir.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io_path("creating", parent, e))?;
    }
    match tokio::fs::create_dir(output_dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(Error::DestinationExists(output_dir.to_path_buf()))
        }
        Err(e) => Err(Error::io_path("creating", output_dir, e)),
    }
}

async fn copy_ancillary(
    files: &ReleaseFiles,
    output_dir: &Path,
    token: &CancellationToken,
) -> Result<()> {
    for source in &files.ancillary {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let dest = mirrored_path(&files.root, output_dir, source);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_path("creating", parent, e))?;
        }
        tokio::fs::copy(source, &dest)
            .await
            .map_err(|e| Error::io_path("copying", source, e))?;
        debug!("copied {}", dest.display());
    }
    Ok(())
}
