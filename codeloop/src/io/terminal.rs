//! Shell command execution for generated code.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument};

use crate::io::config::ExecutionConfig;
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

pub trait CommandRunner {
    fn execute(&self, command: &str) -> Result<CommandResult>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn execute(&self, command: &str) -> Result<CommandResult> {
        (**self).execute(command)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for Box<T> {
    fn execute(&self, command: &str) -> Result<CommandResult> {
        (**self).execute(command)
    }
}

/// Runs commands through `sh -c` inside a working directory.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ShellRunner {
    pub fn new(workdir: impl Into<PathBuf>, config: &ExecutionConfig) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl CommandRunner for ShellRunner {
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    fn execute(&self, command: &str) -> Result<CommandResult> {
        info!(command, "executing");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("execute `{command}`"))?;

        let mut stderr = output.stderr_lossy();
        stderr.push_str(&output.truncation_notice("command"));
        Ok(CommandResult {
            stdout: output.stdout_lossy(),
            stderr,
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }
}
