//! Language model abstraction.
//!
//! The [`LanguageModel`] trait decouples agents from the inference backend.
//! The shipped backend, [`CommandModel`], pipes the prompt into a local CLI
//! (`ollama run <model>` by default). Tests use scripted models that return
//! predetermined completions without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ModelsConfig;
use crate::io::process::run_command_with_timeout;

/// Prompt in, completion out.
pub trait LanguageModel {
    fn complete(&self, prompt: &str) -> Result<String>;
}

impl<T: LanguageModel + ?Sized> LanguageModel for &T {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }
}

impl<T: LanguageModel + ?Sized> LanguageModel for Box<T> {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }
}

impl<T: LanguageModel + ?Sized> LanguageModel for Rc<T> {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }
}

/// Model backed by an external command that reads the prompt from stdin.
#[derive(Debug, Clone)]
pub struct CommandModel {
    pub command: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            workdir: None,
            timeout,
            output_limit_bytes,
        }
    }

    /// Build a model from a configured role command.
    pub fn from_config(config: &ModelsConfig, command: &[String]) -> Self {
        Self::new(
            command.to_vec(),
            Duration::from_secs(config.timeout_secs),
            config.output_limit_bytes,
        )
    }

    fn program(&self) -> Result<&str> {
        self.command
            .first()
            .map(String::as_str)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| anyhow!("model command is empty"))
    }
}

impl LanguageModel for CommandModel {
    #[instrument(skip_all, fields(program = self.command.first().map(String::as_str).unwrap_or(""), prompt_bytes = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let program = self.program()?;
        info!(command = %self.command.join(" "), "invoking model");

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..]);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model command `{program}`"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model timed out");
            return Err(anyhow!("model `{program}` timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model `{program}` failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }

        if output.stdout_truncated > 0 {
            warn!(
                limit = self.output_limit_bytes,
                dropped = output.stdout_truncated,
                "model output exceeded limit"
            );
            return Err(anyhow!(
                "model `{program}` output exceeded {} bytes ({} bytes dropped)",
                self.output_limit_bytes,
                output.stdout_truncated
            ));
        }

        let completion = output.stdout_lossy();
        debug!(completion_bytes = completion.len(), "model completed");
        Ok(completion)
    }
}
