//! Agentic refinement: the refinement loop with real side effects.
//!
//! Generated files are extracted and written into the workspace, the Python
//! entry point (if any) is executed, and execution output and errors are fed
//! to the reviewer and back into each fix.
//!
//! Unlike [`crate::orchestrator::RefinementOrchestrator`], the first review
//! happens before the loop and `iterations` counts fix rounds only.

use std::path::Path;

use anyhow::Result;
use minijinja::context;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::{AgentTeam, Reviewer, call_error};
use crate::core::extract::extract_blocks;
use crate::core::types::{AgentCallError, AgentRole};
use crate::io::config::AppConfig;
use crate::io::knowledge::{JsonlKnowledgeStore, KnowledgeStore};
use crate::io::prompt::{Template, render};
use crate::io::terminal::{CommandRunner, ShellRunner};
use crate::io::workspace::{EntryKind, PersistFailure, Workspace};
use crate::orchestrator::task_metadata;
use crate::reasoner::HierarchicalReasoner;

/// Workspace entries listed in the planning context.
const WORKSPACE_LISTING_LIMIT: usize = 20;
/// File names preferred as the execution entry point, in priority order.
const ENTRY_POINTS: [&str; 4] = ["main.py", "app.py", "index.py", "run.py"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgenticOptions {
    pub auto_save: bool,
    pub auto_execute: bool,
    /// Prepend a hierarchical reasoning pass to planning.
    pub hierarchical: bool,
    /// Maximum fix rounds after the first review.
    pub max_iterations: u32,
}

impl Default for AgenticOptions {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_execute: true,
            hierarchical: false,
            max_iterations: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgenticStatus {
    Pending,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl AgenticStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgenticStatus::Pending => "pending",
            AgenticStatus::Completed => "completed",
            AgenticStatus::CompletedWithErrors => "completed_with_errors",
            AgenticStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgenticResult {
    pub task: String,
    pub status: AgenticStatus,
    pub plan: String,
    pub code: String,
    pub review: String,
    /// Final answer of the reasoning pass, when one ran.
    pub reasoning: Option<String>,
    pub files_created: Vec<String>,
    /// Files rewritten by fix rounds, in write order (may repeat).
    pub files_modified: Vec<String>,
    pub write_failures: Vec<PersistFailure>,
    pub execution_output: String,
    pub errors: Vec<String>,
    pub iterations: u32,
    pub approved: bool,
    pub failure: Option<AgentCallError>,
}

impl AgenticResult {
    fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            status: AgenticStatus::Pending,
            plan: String::new(),
            code: String::new(),
            review: String::new(),
            reasoning: None,
            files_created: Vec::new(),
            files_modified: Vec::new(),
            write_failures: Vec::new(),
            execution_output: String::new(),
            errors: Vec::new(),
            iterations: 0,
            approved: false,
            failure: None,
        }
    }

    fn fail(mut self, role: AgentRole, err: &anyhow::Error) -> Self {
        warn!(%role, err = %format!("{err:#}"), "agent call failed; aborting run");
        self.status = AgenticStatus::Failed;
        self.failure = Some(call_error(role, err));
        self
    }

    /// Code plus execution evidence, as shown to the reviewer.
    fn review_subject(&self) -> String {
        let mut subject = self.code.clone();
        if !self.execution_output.trim().is_empty() {
            subject.push_str("\n\n## Execution Output:\n");
            subject.push_str(self.execution_output.trim_end());
        }
        if !self.errors.is_empty() {
            subject.push_str("\n\n## Errors:\n");
            subject.push_str(&self.errors.join("\n"));
        }
        subject
    }
}

/// Output of one execution attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Execution {
    output: String,
    error: Option<String>,
}

pub struct AgenticOrchestrator {
    team: AgentTeam,
    workspace: Workspace,
    runner: Box<dyn CommandRunner>,
    knowledge: Option<Box<dyn KnowledgeStore>>,
    reasoner: Option<HierarchicalReasoner>,
    python: String,
}

impl AgenticOrchestrator {
    pub fn new(team: AgentTeam, workspace: Workspace, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            team,
            workspace,
            runner,
            knowledge: None,
            reasoner: None,
            python: "python3".to_string(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Box<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_reasoner(mut self, reasoner: HierarchicalReasoner) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Orchestrator wired to the configured models, workspace and shell.
    /// Relative paths in the configuration resolve against `base`.
    pub fn from_config(cfg: &AppConfig, base: &Path) -> Result<Self> {
        let workspace = Workspace::from_config(&cfg.workspace, base)?;
        let runner = ShellRunner::new(workspace.root(), &cfg.execution);
        let mut orchestrator = Self::new(AgentTeam::from_config(cfg)?, workspace, Box::new(runner))
            .with_reasoner(HierarchicalReasoner::from_config(cfg)?)
            .with_python(cfg.execution.python.clone());
        if cfg.use_knowledge {
            orchestrator = orchestrator.with_knowledge(Box::new(JsonlKnowledgeStore::from_config(
                &cfg.knowledge,
                base,
            )));
        }
        Ok(orchestrator)
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn clear_history(&mut self) {
        self.team.clear_history();
    }

    #[instrument(skip_all, fields(max_iterations = options.max_iterations))]
    pub fn run(
        &mut self,
        task: &str,
        context: Option<&str>,
        options: &AgenticOptions,
    ) -> AgenticResult {
        let mut result = AgenticResult::new(task);

        let mut full_context = self.gather_context(task, context);
        if options.hierarchical {
            result.reasoning = self.reasoning(task);
            if let Some(answer) = &result.reasoning {
                full_context.push_str("\n\n## Reasoning:\n");
                full_context.push_str(answer);
            }
        }

        info!("planning");
        let plan = render(
            Template::AgenticPlan,
            context! { task => task, context => full_context.trim() },
        )
        .and_then(|prompt| self.team.planner.run(&prompt));
        result.plan = match plan {
            Ok(plan) => plan,
            Err(err) => return result.fail(AgentRole::Planner, &err),
        };

        info!("coding");
        let code = render(
            Template::AgenticCode,
            context! { task => task, plan => result.plan.as_str() },
        )
        .and_then(|prompt| self.team.coder.run(&prompt));
        result.code = match code {
            Ok(code) => code,
            Err(err) => return result.fail(AgentRole::Coder, &err),
        };

        if options.auto_save {
            let written = self.save(&mut result);
            result.files_created = written;
        }
        if options.auto_execute {
            let execution = self.execute(&result.files_created);
            result.execution_output = execution.output;
            result.errors.extend(execution.error);
        }

        info!("reviewing");
        result.review = match self
            .team
            .reviewer
            .check_implementation(&result.review_subject(), &result.plan)
        {
            Ok(review) => review,
            Err(err) => return result.fail(AgentRole::Reviewer, &err),
        };
        result.approved = Reviewer::is_approved(&result.review);

        while !result.approved && result.iterations < options.max_iterations {
            result.iterations += 1;
            info!(iteration = result.iterations, "fixing");

            let fixed = render(
                Template::AgenticFix,
                context! {
                    code => result.code.as_str(),
                    review => result.review.as_str(),
                    errors => &result.errors,
                },
            )
            .and_then(|prompt| self.team.coder.run(&prompt));
            result.code = match fixed {
                Ok(code) => code,
                Err(err) => return result.fail(AgentRole::Coder, &err),
            };

            if options.auto_save {
                let written = self.save(&mut result);
                result.files_modified.extend(written);
            }
            if options.auto_execute {
                let files: Vec<String> = result
                    .files_created
                    .iter()
                    .chain(&result.files_modified)
                    .cloned()
                    .collect();
                let execution = self.execute(&files);
                result.execution_output = execution.output;
                match execution.error {
                    Some(error) => result.errors.push(error),
                    None => result.errors.clear(),
                }
            }

            result.review = match self
                .team
                .reviewer
                .check_implementation(&result.review_subject(), &result.plan)
            {
                Ok(review) => review,
                Err(err) => return result.fail(AgentRole::Reviewer, &err),
            };
            result.approved = Reviewer::is_approved(&result.review);
        }

        result.status = if result.errors.is_empty() {
            AgenticStatus::Completed
        } else {
            AgenticStatus::CompletedWithErrors
        };
        info!(
            status = result.status.as_str(),
            files = result.files_created.len(),
            iterations = result.iterations,
            approved = result.approved,
            "agentic run finished"
        );
        self.store_result(&result);
        result
    }

    fn gather_context(&self, task: &str, context: Option<&str>) -> String {
        let mut full = context.unwrap_or_default().trim().to_string();

        let listing = self.workspace_listing();
        if !listing.is_empty() {
            full.push_str("\n\n## Current Workspace Structure:\n");
            full.push_str(&listing);
        }

        if let Some(knowledge) = &self.knowledge {
            match knowledge.get_context(task) {
                Ok(found) if !found.trim().is_empty() => {
                    full.push_str("\n\n## Relevant Code Context:\n");
                    full.push_str(found.trim());
                }
                Ok(_) => {}
                Err(err) => warn!(err = %format!("{err:#}"), "knowledge lookup failed"),
            }
        }
        full
    }

    fn workspace_listing(&self) -> String {
        match self.workspace.list_directory(".") {
            Ok(entries) => entries
                .iter()
                .take(WORKSPACE_LISTING_LIMIT)
                .map(|entry| match entry.kind {
                    EntryKind::Directory => format!("{}/", entry.name),
                    EntryKind::File => entry.name.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(err) => {
                debug!(err = %format!("{err:#}"), "workspace listing unavailable");
                String::new()
            }
        }
    }

    fn reasoning(&mut self, task: &str) -> Option<String> {
        let Some(reasoner) = self.reasoner.as_mut() else {
            warn!("hierarchical reasoning requested but no reasoner is configured");
            return None;
        };
        match reasoner.reason(task) {
            Ok(trace) => Some(trace.final_answer),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reasoning failed; planning without it");
                None
            }
        }
    }

    /// Extract and persist blocks from the current code. Returns written paths.
    fn save(&self, result: &mut AgenticResult) -> Vec<String> {
        let blocks = extract_blocks(&result.code);
        if blocks.is_empty() {
            warn!("no file blocks found in generated code");
            return Vec::new();
        }
        let report = self.workspace.persist_blocks(&blocks);
        info!(
            written = report.written.len(),
            failed = report.failures.len(),
            "saved generated files"
        );
        result.write_failures.extend(report.failures);
        report.written
    }

    fn execute(&self, files: &[String]) -> Execution {
        let mut execution = Execution::default();
        if files.is_empty() {
            return execution;
        }

        let entry = pick_entry_point(files);
        if let Some(entry) = entry {
            let command = format!("{} {}", self.python, shell_quote(entry));
            info!(command = %command, "executing entry point");
            match self.runner.execute(&command) {
                Ok(run) => {
                    execution.output = run.stdout.clone();
                    if run.timed_out {
                        execution.error = Some(format!("{entry} timed out"));
                    } else if !run.success() {
                        execution.error = Some(if run.stderr.trim().is_empty() {
                            match run.exit_code {
                                Some(code) => format!("Exit code: {code}"),
                                None => "terminated by signal".to_string(),
                            }
                        } else {
                            run.stderr.clone()
                        });
                    }
                }
                Err(err) => execution.error = Some(format!("{err:#}")),
            }
        }

        let html: Vec<&str> = files
            .iter()
            .map(String::as_str)
            .filter(|f| f.ends_with(".html"))
            .collect();
        if entry.is_none() && !html.is_empty() {
            execution.output = format!("Created HTML files: {}", html.join(", "));
        }
        if files.iter().any(|f| f.ends_with("package.json")) {
            execution
                .output
                .push_str("\n\nNote: Run 'npm install' to install dependencies");
        }
        execution
    }

    fn store_result(&self, result: &AgenticResult) {
        let Some(knowledge) = &self.knowledge else {
            return;
        };
        if result.code.trim().is_empty() {
            return;
        }
        let metadata = task_metadata(&result.task, result.status.as_str());
        if let Err(err) = knowledge.store_code(&result.code, &metadata) {
            warn!(err = %format!("{err:#}"), "failed to store code in knowledge base");
        }
    }
}

/// A well-known entry file name if present, else the first Python file.
pub fn pick_entry_point(files: &[String]) -> Option<&str> {
    let file_name = |f: &str| {
        Path::new(f)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };
    files
        .iter()
        .find(|f| ENTRY_POINTS.contains(&file_name(f).as_str()))
        .or_else(|| files.iter().find(|f| f.to_lowercase().ends_with(".py")))
        .map(String::as_str)
}

/// Single-quote `arg` for `sh`.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}
