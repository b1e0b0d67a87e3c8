//! Configuration stored under `.codeloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::AgentRole;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".codeloop/config.toml";

/// Top-level configuration (TOML).
///
/// Meant to be edited by hand. Missing fields fall back to the defaults shown
/// by `codeloop init`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Upper bound on coding+review cycles per run.
    pub max_iterations: u32,

    /// Turns of conversation memory each agent keeps.
    pub history_window: usize,

    /// Query and update the knowledge store during runs.
    pub use_knowledge: bool,

    pub models: ModelsConfig,
    pub knowledge: KnowledgeConfig,
    pub workspace: WorkspaceConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelsConfig {
    /// Wall-clock limit for a single model call.
    pub timeout_secs: u64,

    /// A model reply longer than this many bytes is an error.
    pub output_limit_bytes: usize,

    /// Agent prompts above this size drop history, then context.
    pub prompt_budget_bytes: usize,

    /// Command per role; the prompt is written to stdin.
    pub planner: Vec<String>,
    pub coder: Vec<String>,
    pub reviewer: Vec<String>,
    pub reasoner: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// JSON Lines file, relative to the working directory unless absolute.
    pub path: PathBuf,
    pub max_results: usize,
    pub max_context_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory generated files are written into.
    pub root: PathBuf,
    /// Reject generated paths that resolve outside `root`.
    pub sandbox: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Interpreter used to run generated Python entry points.
    pub python: String,
}

fn ollama(model: &str) -> Vec<String> {
    vec!["ollama".to_string(), "run".to_string(), model.to_string()]
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            output_limit_bytes: 1_000_000,
            prompt_budget_bytes: 200_000,
            planner: ollama("deepseek-r1:8b"),
            coder: ollama("qwen2.5-coder:7b"),
            reviewer: ollama("qwen2.5-coder:7b"),
            reasoner: ollama("deepseek-r1:8b"),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".codeloop/knowledge.jsonl"),
            max_results: 5,
            max_context_chars: 8000,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            sandbox: true,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            output_limit_bytes: 100_000,
            python: "python3".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            history_window: 5,
            use_knowledge: true,
            models: ModelsConfig::default(),
            knowledge: KnowledgeConfig::default(),
            workspace: WorkspaceConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl ModelsConfig {
    pub fn command_for(&self, role: AgentRole) -> &[String] {
        match role {
            AgentRole::Planner => &self.planner,
            AgentRole::Coder => &self.coder,
            AgentRole::Reviewer => &self.reviewer,
            AgentRole::Reasoner => &self.reasoner,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.models.timeout_secs == 0 {
            return Err(anyhow!("models.timeout_secs must be > 0"));
        }
        if self.models.output_limit_bytes == 0 {
            return Err(anyhow!("models.output_limit_bytes must be > 0"));
        }
        if self.models.prompt_budget_bytes == 0 {
            return Err(anyhow!("models.prompt_budget_bytes must be > 0"));
        }
        for role in [
            AgentRole::Planner,
            AgentRole::Coder,
            AgentRole::Reviewer,
            AgentRole::Reasoner,
        ] {
            let command = self.models.command_for(role);
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("models.{role} must be a non-empty array"));
            }
        }
        if self.knowledge.max_results == 0 {
            return Err(anyhow!("knowledge.max_results must be > 0"));
        }
        if self.execution.timeout_secs == 0 {
            return Err(anyhow!("execution.timeout_secs must be > 0"));
        }
        if self.execution.output_limit_bytes == 0 {
            return Err(anyhow!("execution.output_limit_bytes must be > 0"));
        }
        if self.execution.python.trim().is_empty() {
            return Err(anyhow!("execution.python must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".codeloop").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.max_iterations = 7;
        cfg.workspace.sandbox = false;
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 5\n[execution]\npython = \"python3.12\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.execution.python, "python3.12");
        assert_eq!(cfg.execution.timeout_secs, 30);
        assert_eq!(cfg.models, ModelsConfig::default());
    }

    #[test]
    fn rejects_zero_iterations_and_empty_commands() {
        let mut cfg = AppConfig::default();
        cfg.max_iterations = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.models.reviewer = Vec::new();
        let err = cfg.validate().expect_err("empty reviewer");
        assert!(err.to_string().contains("models.reviewer"));
    }
}
