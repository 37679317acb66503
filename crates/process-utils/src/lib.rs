//! Process helpers shared across the workspace.
//!
//! - [`ProcessPipeline`] runs `cmd1 | cmd2 | ...` without a shell and reports
//!   every stage's exit status and stderr.
//! - [`ProcessTracker`] records the process groups of running pipelines so a
//!   coordinator can tell whether anything is still alive.

use std::ffi::OsStr;

mod error;
mod pipeline;
mod tracker;

pub use error::{PipelineError, Result};
pub use pipeline::{
    PipelineResult, ProcessPipeline, StageExit, StageResult, quote_arg, split_command,
};
pub use tracker::{ProcessTracker, TrackedGroup};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}
