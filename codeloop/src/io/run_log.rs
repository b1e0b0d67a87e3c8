//! Run logs under `.codeloop/runs/<run-id>/`.
//!
//! Each run gets a `meta.json` summary plus one markdown file per history
//! record, numbered in history order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;

use crate::core::types::{AgentCallError, TaskResult, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta<'a> {
    pub run_id: &'a str,
    pub task: &'a str,
    pub status: TaskStatus,
    pub iterations: u32,
    pub approved: bool,
    pub failure: Option<&'a AgentCallError>,
    pub records: usize,
}

#[derive(Debug, Clone)]
pub struct RunLogPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub record_paths: Vec<PathBuf>,
}

/// `run-<UTC timestamp>-<6 random alphanumerics>`.
pub fn generate_run_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("run-{}-{suffix}", Utc::now().format("%Y%m%d_%H%M%S"))
}

pub fn run_dir(root: &Path, run_id: &str) -> PathBuf {
    root.join(".codeloop").join("runs").join(run_id)
}

pub fn write_run_log(root: &Path, run_id: &str, result: &TaskResult) -> Result<RunLogPaths> {
    let dir = run_dir(root, run_id);
    fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;

    let meta = RunMeta {
        run_id,
        task: &result.task,
        status: result.status,
        iterations: result.iterations,
        approved: result.approved,
        failure: result.failure.as_ref(),
        records: result.history.len(),
    };
    let meta_path = dir.join("meta.json");
    write_json(&meta_path, &meta)?;

    let mut record_paths = Vec::with_capacity(result.history.len());
    for (idx, record) in result.history.iter().enumerate() {
        let name = format!(
            "{:02}-{}-{}.md",
            idx + 1,
            record.phase.as_str(),
            record.iteration
        );
        let path = dir.join(name);
        let body = format!(
            "<!-- {} iteration {} at {} -->\n\n{}\n",
            record.phase.as_str(),
            record.iteration,
            record.timestamp.to_rfc3339(),
            record.output.trim_end()
        );
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        record_paths.push(path);
    }

    Ok(RunLogPaths {
        dir,
        meta_path,
        record_paths,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
