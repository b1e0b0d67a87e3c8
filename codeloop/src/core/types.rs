//! Shared deterministic types for the refinement core.
//!
//! These types define stable contracts between the orchestrators, the agents,
//! and the run log. They carry no I/O and serialize to a stable JSON shape.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a refinement run.
///
/// Transitions are monotonic except for the `Coding -> Reviewing -> Fixing`
/// cycle, which repeats once per unapproved iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Planning,
    Coding,
    Reviewing,
    Fixing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Coding => "coding",
            TaskStatus::Reviewing => "reviewing",
            TaskStatus::Fixing => "fixing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase that produced an [`IterationRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Coding,
    Reviewing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Coding => "coding",
            Phase::Reviewing => "reviewing",
        }
    }
}

/// Role an agent plays in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Coder,
    Reviewer,
    Reasoner,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Reasoner => "reasoner",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only entry of a run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub phase: Phase,
    /// 0 for planning, 1-indexed for coding/reviewing.
    pub iteration: u32,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn now(phase: Phase, iteration: u32, output: impl Into<String>) -> Self {
        Self {
            phase,
            iteration,
            output: output.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A model or transport failure from one of the agents.
///
/// Fatal to the run that observed it. Returned inside [`TaskResult`] rather
/// than raised, so the partial history stays available to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCallError {
    pub role: AgentRole,
    pub message: String,
}

impl AgentCallError {
    pub fn new(role: AgentRole, err: &anyhow::Error) -> Self {
        Self {
            role,
            message: format!("{err:#}"),
        }
    }
}

impl fmt::Display for AgentCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} call failed: {}", self.role, self.message)
    }
}

impl std::error::Error for AgentCallError {}

/// Aggregate produced by one refinement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: String,
    pub status: TaskStatus,
    pub plan: String,
    pub code: String,
    pub review: String,
    /// Number of coding+review cycles started (never above `max_iterations`).
    pub iterations: u32,
    pub history: Vec<IterationRecord>,
    /// True only when the reviewer approved. A run that exhausts its budget is
    /// still `Completed` but keeps `approved == false`.
    pub approved: bool,
    pub failure: Option<AgentCallError>,
}

impl TaskResult {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Pending,
            plan: String::new(),
            code: String::new(),
            review: String::new(),
            iterations: 0,
            history: Vec::new(),
            approved: false,
            failure: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub(crate) fn record(&mut self, phase: Phase, iteration: u32, output: &str) {
        self.history
            .push(IterationRecord::now(phase, iteration, output));
    }

    pub(crate) fn fail(&mut self, err: AgentCallError) {
        self.status = TaskStatus::Failed;
        self.failure = Some(err);
    }
}

/// A file recovered from a generated-code document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlock {
    /// Relative (or explicitly absolute) path, trimmed, without a leading `./`.
    pub path: String,
    /// Block body with surrounding whitespace trimmed.
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn new_result_is_pending_and_not_successful() {
        let result = TaskResult::new("task");
        assert_eq!(result.status, TaskStatus::Pending);
        assert!(!result.success());
        assert!(result.history.is_empty());
    }

    #[test]
    fn fail_sets_status_and_keeps_history() {
        let mut result = TaskResult::new("task");
        result.record(Phase::Planning, 0, "plan");
        result.fail(AgentCallError::new(
            AgentRole::Coder,
            &anyhow!("connection refused"),
        ));

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.history.len(), 1);
        let failure = result.failure.expect("failure");
        assert_eq!(failure.role, AgentRole::Coder);
        assert_eq!(failure.to_string(), "coder call failed: connection refused");
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Completed).expect("serialize");
        assert_eq!(json, "\"completed\"");
    }
}
