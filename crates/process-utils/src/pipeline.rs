//! Multi-stage subprocess pipelines.
//!
//! Stages are connected stdout-to-stdin like `cmd1 | cmd2` in a shell, but no
//! shell is involved and every stage's exit status and stderr are kept. That
//! lets the caller tell the stage that actually failed apart from an upstream
//! stage that was merely killed by `SIGPIPE` after its reader went away.

use std::borrow::Cow;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::tracker::{ProcessTracker, TrackedGroup};
use crate::tokio_command;

const SIGPIPE: i32 = 13;

/// How a stage terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageExit {
    /// Normal exit with a status code.
    Code(i32),
    /// Killed by a signal (Unix only).
    Signal(i32),
}

impl StageExit {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Code(-1)
    }

    /// Whether the stage exited with status 0.
    pub fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// Whether the stage died because its stdout reader went away.
    pub fn is_broken_pipe(&self) -> bool {
        cfg!(unix) && matches!(self, Self::Signal(SIGPIPE))
    }
}

impl std::fmt::Display for StageExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageExit::Code(code) => write!(f, "exit code {}", code),
            StageExit::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    /// The command as it was given to the pipeline.
    pub command: String,
    pub exit: StageExit,
    /// Everything the stage wrote to stderr (lossy UTF-8).
    pub stderr: String,
}

/// Per-stage outcome of a whole pipeline, in stage order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineResult {
    pub stages: Vec<StageResult>,
}

impl PipelineResult {
    /// The stage to blame for a failed pipeline, with its index.
    ///
    /// Any stage with a non-zero exit that is not `SIGPIPE` is a genuine
    /// failure and the first of those is returned. A stage killed by
    /// `SIGPIPE` is only blamed when no genuine failure exists.
    pub fn failed_stage(&self) -> Option<(usize, &StageResult)> {
        let mut broken_pipe = None;
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.exit.success() {
                continue;
            }
            if !stage.exit.is_broken_pipe() {
                return Some((index, stage));
            }
            broken_pipe.get_or_insert((index, stage));
        }
        broken_pipe
    }

    /// Whether any stage failed.
    pub fn failed(&self) -> bool {
        self.failed_stage().is_some()
    }
}

/// Quote a single argument so it survives being split back into argv as one
/// token, whatever spaces or shell metacharacters it contains.
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    shell_words::quote(arg)
}

/// Split a command string into argv the way [`ProcessPipeline::run`] does.
pub fn split_command(command: &str) -> Result<Vec<String>> {
    let argv = shell_words::split(command).map_err(|e| PipelineError::InvalidCommand {
        command: command.to_string(),
        reason: e.to_string(),
    })?;
    if argv.is_empty() {
        return Err(PipelineError::InvalidCommand {
            command: command.to_string(),
            reason: "empty command".to_string(),
        });
    }
    Ok(argv)
}

/// Runner for `cmd1 | cmd2 | ...` chains.
///
/// All stages of one run share a process group and are spawned with
/// `kill_on_drop`, so a run that is cancelled or abandoned never leaves a
/// decoder or encoder behind.
#[derive(Debug, Clone, Default)]
pub struct ProcessPipeline {
    tracker: Option<Arc<ProcessTracker>>,
}

impl ProcessPipeline {
    /// Create a pipeline runner without process-group tracking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline runner that registers every run's process group.
    pub fn with_tracker(tracker: Arc<ProcessTracker>) -> Self {
        Self {
            tracker: Some(tracker),
        }
    }

    /// Run `commands` as one pipeline and wait for every stage to exit.
    ///
    /// Each command is split into argv with shell-word rules. The first stage
    /// reads from `/dev/null` and the last stage's stdout is discarded.
    /// Cancelling `token` kills every stage and returns
    /// [`PipelineError::Cancelled`] once they have all been reaped.
    pub async fn run<S: AsRef<str>>(
        &self,
        commands: &[S],
        token: &CancellationToken,
    ) -> Result<PipelineResult> {
        if commands.is_empty() {
            return Err(PipelineError::Empty);
        }
        let argvs = commands
            .iter()
            .map(|c| split_command(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let label = commands
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" | ");
        let last = argvs.len() - 1;

        let mut children: Vec<Child> = Vec::with_capacity(argvs.len());
        let mut stderr_tasks = Vec::with_capacity(argvs.len());
        let mut group: Option<TrackedGroup> = None;
        let mut pgid: Option<u32> = None;
        let mut upstream: Option<ChildStdout> = None;

        // On any early return, dropping `children` kills what was already spawned.
        for (index, argv) in argvs.iter().enumerate() {
            let mut command = tokio_command(&argv[0]);
            command
                .args(&argv[1..])
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            match upstream.take() {
                Some(stdout) => {
                    let stdin: Stdio = stdout.try_into()?;
                    command.stdin(stdin);
                }
                None => {
                    command.stdin(Stdio::null());
                }
            }
            if index == last {
                command.stdout(Stdio::null());
            } else {
                command.stdout(Stdio::piped());
            }

            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                command
                    .as_std_mut()
                    .process_group(pgid.map_or(0, |id| id as i32));
            }

            let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
                command: commands[index].as_ref().to_string(),
                source,
            })?;
            // The command still holds the upstream read end; only the child may keep it.
            drop(command);

            debug!(
                stage = index,
                pid = ?child.id(),
                "spawned pipeline stage: {}",
                commands[index].as_ref()
            );

            if pgid.is_none() {
                pgid = child.id();
                if let (Some(tracker), Some(id)) = (&self.tracker, pgid) {
                    group = Some(tracker.register(id, label.clone()));
                }
            }

            stderr_tasks.push(child.stderr.take().map(collect_stderr));
            upstream = child.stdout.take();
            children.push(child);
        }

        let statuses = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            statuses = wait_all(&mut children) => Some(statuses),
        };

        let statuses = match statuses {
            Some(Ok(statuses)) => statuses,
            Some(Err(e)) => {
                terminate(&mut children).await;
                drop(group);
                return Err(PipelineError::Io(e));
            }
            None => {
                debug!(pgid = ?pgid, "pipeline cancelled, terminating stages: {}", label);
                terminate(&mut children).await;
                drop(group);
                return Err(PipelineError::Cancelled);
            }
        };
        drop(group);

        let mut stages = Vec::with_capacity(statuses.len());
        for ((status, task), command) in statuses.into_iter().zip(stderr_tasks).zip(commands) {
            let stderr = match task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            let exit = StageExit::from_status(status);
            debug!("pipeline stage `{}` finished with {}", command.as_ref(), exit);
            stages.push(StageResult {
                command: command.as_ref().to_string(),
                exit,
                stderr,
            });
        }

        Ok(PipelineResult { stages })
    }
}

fn collect_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut buf).await {
            warn!("failed to read stage stderr: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn wait_all(children: &mut [Child]) -> std::io::Result<Vec<ExitStatus>> {
    let mut statuses = Vec::with_capacity(children.len());
    for child in children.iter_mut() {
        statuses.push(child.wait().await?);
    }
    Ok(statuses)
}

/// Kill every stage of the group, then reap them all.
async fn terminate(children: &mut [Child]) {
    for child in children.iter_mut() {
        if let Err(e) = child.start_kill() {
            debug!("stage already gone: {}", e);
        }
    }
    for child in children.iter_mut() {
        if let Err(e) = child.wait().await {
            warn!("failed to reap pipeline stage: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(command: &str, exit: StageExit) -> StageResult {
        StageResult {
            command: command.to_string(),
            exit,
            stderr: String::new(),
        }
    }

    #[test]
    fn test_all_success() {
        let result = PipelineResult {
            stages: vec![
                stage("flac -dcs -- a.flac", StageExit::Code(0)),
                stage("lame - a.mp3", StageExit::Code(0)),
            ],
        };
        assert!(!result.failed());
        assert!(result.failed_stage().is_none());
    }

    #[test]
    fn test_upstream_sigpipe_not_blamed_when_downstream_failed() {
        let result = PipelineResult {
            stages: vec![
                stage("flac -dcs -- a.flac", StageExit::Signal(SIGPIPE)),
                stage("lame - a.mp3", StageExit::Code(1)),
            ],
        };
        let (index, failed) = result.failed_stage().unwrap();
        assert_eq!(index, 1);
        assert_eq!(failed.command, "lame - a.mp3");
    }

    #[test]
    fn test_first_genuine_failure_wins() {
        let result = PipelineResult {
            stages: vec![
                stage("flac -dcs -- a.flac", StageExit::Code(2)),
                stage("lame - a.mp3", StageExit::Signal(SIGPIPE)),
            ],
        };
        assert_eq!(result.failed_stage().unwrap().0, 0);
    }

    #[test]
    fn test_lone_sigpipe_is_promoted() {
        let result = PipelineResult {
            stages: vec![
                stage("flac -dcs -- a.flac", StageExit::Signal(SIGPIPE)),
                stage("lame - a.mp3", StageExit::Code(0)),
            ],
        };
        if cfg!(unix) {
            assert_eq!(result.failed_stage().unwrap().0, 0);
        } else {
            assert!(result.failed());
        }
    }

    #[test]
    fn test_other_signals_are_failures() {
        let result = PipelineResult {
            stages: vec![stage("sox in.flac out.flac", StageExit::Signal(9))],
        };
        assert!(result.failed());
    }

    #[test]
    fn test_stage_exit_display() {
        assert_eq!(StageExit::Code(2).to_string(), "exit code 2");
        assert_eq!(StageExit::Signal(13).to_string(), "signal 13");
    }

    #[test]
    fn test_quote_arg_round_trips_through_split() {
        let path = "/music/Artist - Album [FLAC]/01 it's \"here\".flac";
        let command = format!("flac -dcs -- {}", quote_arg(path));
        let argv = split_command(&command).unwrap();
        assert_eq!(argv, vec!["flac", "-dcs", "--", path]);
    }

    #[test]
    fn test_parse_rejects_empty_and_unbalanced() {
        assert!(matches!(
            split_command("   "),
            Err(PipelineError::InvalidCommand { .. })
        ));
        assert!(matches!(
            split_command("flac 'unterminated"),
            Err(PipelineError::InvalidCommand { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_pipeline_rejected() {
        let commands: [&str; 0] = [];
        let err = ProcessPipeline::new()
            .run(&commands, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Empty));
    }
}
