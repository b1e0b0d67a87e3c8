//! The bounded Plan -> Code -> Review -> Fix refinement loop.
//!
//! One planning call, then up to `max_iterations` coding+review cycles. The
//! first cycle implements the plan; later cycles fix the previous code using
//! the previous review. The loop stops as soon as the reviewer approves.
//!
//! A run that exhausts its iterations without approval still ends
//! [`TaskStatus::Completed`], with `approved == false`. Callers that need
//! reviewer sign-off must check [`TaskResult::approved`], not
//! [`TaskResult::success`].
//!
//! Agent failures never escape [`RefinementOrchestrator::run`]: they end the
//! run as [`TaskStatus::Failed`] with the partial history intact.

use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, instrument, warn};

use crate::agents::{AgentTeam, Reviewer, call_error};
use crate::core::types::{AgentRole, Phase, TaskResult, TaskStatus};
use crate::io::config::AppConfig;
use crate::io::knowledge::{JsonlKnowledgeStore, KnowledgeStore, Metadata};

/// Characters of the task kept in stored-code metadata.
const TASK_METADATA_CHARS: usize = 200;

pub struct RefinementOrchestrator {
    team: AgentTeam,
    knowledge: Option<Box<dyn KnowledgeStore>>,
    max_iterations: u32,
}

impl RefinementOrchestrator {
    pub fn new(team: AgentTeam, max_iterations: u32) -> Self {
        Self {
            team,
            knowledge: None,
            max_iterations,
        }
    }

    pub fn with_knowledge(mut self, knowledge: Box<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Orchestrator wired to the configured model commands and knowledge file.
    /// Relative knowledge paths resolve against `base`.
    pub fn from_config(cfg: &AppConfig, base: &Path) -> Result<Self> {
        let orchestrator = Self::new(AgentTeam::from_config(cfg)?, cfg.max_iterations);
        Ok(if cfg.use_knowledge {
            orchestrator.with_knowledge(Box::new(JsonlKnowledgeStore::from_config(
                &cfg.knowledge,
                base,
            )))
        } else {
            orchestrator
        })
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn team_mut(&mut self) -> &mut AgentTeam {
        &mut self.team
    }

    /// Drive one task through the refinement loop.
    #[instrument(skip_all, fields(max_iterations = self.max_iterations))]
    pub fn run(&mut self, task: &str, existing_code: Option<&str>) -> TaskResult {
        let mut result = TaskResult::new(task);
        let existing_code = existing_code.map(str::trim).filter(|c| !c.is_empty());

        result.status = TaskStatus::Planning;
        info!("planning");
        let mut context = self.knowledge_context(task);
        if let Some(code) = existing_code {
            context.push_str("\n\n## Existing Code:\n");
            context.push_str(code);
        }
        let context = context.trim();
        let plan = self
            .team
            .planner
            .plan(task, (!context.is_empty()).then_some(context));
        match plan {
            Ok(plan) => {
                result.record(Phase::Planning, 0, &plan);
                result.plan = plan;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "planning failed");
                result.fail(call_error(AgentRole::Planner, &err));
                return result;
            }
        }

        for iteration in 1..=self.max_iterations {
            result.iterations = iteration;
            result.status = TaskStatus::Coding;
            info!(iteration, "coding");
            let code = if iteration == 1 {
                self.team.coder.implement(&result.plan, existing_code)
            } else {
                self.team.coder.fix(&result.code, &result.review)
            };
            match code {
                Ok(code) => {
                    result.record(Phase::Coding, iteration, &code);
                    result.code = code;
                }
                Err(err) => {
                    warn!(iteration, err = %format!("{err:#}"), "coding failed");
                    result.fail(call_error(AgentRole::Coder, &err));
                    return result;
                }
            }

            result.status = TaskStatus::Reviewing;
            info!(iteration, "reviewing");
            match self
                .team
                .reviewer
                .check_implementation(&result.code, &result.plan)
            {
                Ok(review) => {
                    result.record(Phase::Reviewing, iteration, &review);
                    result.review = review;
                }
                Err(err) => {
                    warn!(iteration, err = %format!("{err:#}"), "review failed");
                    result.fail(call_error(AgentRole::Reviewer, &err));
                    return result;
                }
            }

            if Reviewer::is_approved(&result.review) {
                info!(iteration, "approved");
                result.approved = true;
                result.status = TaskStatus::Completed;
                break;
            }
            result.status = TaskStatus::Fixing;
        }

        if !result.approved {
            warn!(
                iterations = result.iterations,
                "iteration budget exhausted without approval; completing best-effort"
            );
            result.status = TaskStatus::Completed;
        }

        self.store_result(&result);
        result
    }

    /// A single planning call with a fixed framing and no context.
    pub fn plan_only(&mut self, task: &str) -> Result<String> {
        self.team
            .planner
            .run(&format!("Create a detailed implementation plan for: {task}"))
    }

    /// A single coding call with a fixed framing and no context.
    pub fn quick_code(&mut self, task: &str) -> Result<String> {
        self.team
            .coder
            .run(&format!("Implement the following: {task}"))
    }

    pub fn review_only(&mut self, code: &str, requirements: Option<&str>) -> Result<String> {
        self.team.reviewer.review_code(code, requirements)
    }

    pub fn clear_history(&mut self) {
        self.team.clear_history();
    }

    /// Store documentation or code for later retrieval.
    pub fn add_to_knowledge(&self, code: &str, source: Option<&str>) -> Result<()> {
        let Some(knowledge) = &self.knowledge else {
            bail!("knowledge store is disabled");
        };
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), source.unwrap_or("manual").to_string());
        knowledge.store_code(code, &metadata)
    }

    fn knowledge_context(&self, task: &str) -> String {
        let Some(knowledge) = &self.knowledge else {
            return String::new();
        };
        knowledge.get_context(task).unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "knowledge lookup failed; continuing without context");
            String::new()
        })
    }

    fn store_result(&self, result: &TaskResult) {
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

/// Metadata attached to code stored after a run.
pub(crate) fn task_metadata(task: &str, status: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        "task".to_string(),
        task.chars().take(TASK_METADATA_CHARS).collect(),
    );
    metadata.insert("status".to_string(), status.to_string());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        RecordingKnowledge, ScriptedTeam, approved_review, needs_changes_review,
    };

    #[test]
    fn existing_code_reaches_planner_and_coder() {
        let team = ScriptedTeam::default();
        team.planner.push_ok("plan");
        team.coder.push_ok("code");
        team.reviewer.push_ok(approved_review());
        let mut orchestrator = RefinementOrchestrator::new(team.build(), 3);

        let result = orchestrator.run("extend it", Some("fn old() {}"));

        assert!(result.approved);
        assert!(team.planner.prompts()[0].contains("## Existing Code:\nfn old() {}"));
        assert!(team.coder.prompts()[0].contains("fn old() {}"));
    }

    #[test]
    fn knowledge_failures_are_swallowed() {
        let team = ScriptedTeam::default();
        team.planner.push_ok("plan");
        team.coder.push_ok("code");
        team.reviewer.push_ok(approved_review());
        let mut orchestrator = RefinementOrchestrator::new(team.build(), 2)
            .with_knowledge(Box::new(RecordingKnowledge::failing()));

        let result = orchestrator.run("task", None);

        assert_eq!(result.status, TaskStatus::Completed);
        assert!(result.approved);
        assert!(!team.planner.prompts()[0].contains("## Relevant Context"));
    }

    #[test]
    fn fix_uses_previous_code_and_review() {
        let team = ScriptedTeam::default();
        team.planner.push_ok("plan");
        team.coder.push_ok("first code");
        team.coder.push_ok("second code");
        team.reviewer.push_ok(needs_changes_review());
        team.reviewer.push_ok(approved_review());
        let mut orchestrator = RefinementOrchestrator::new(team.build(), 3);

        let result = orchestrator.run("task", None);

        assert_eq!(result.iterations, 2);
        let fix_prompt = &team.coder.prompts()[1];
        assert!(fix_prompt.contains("## Code with Issues\nfirst code"));
        assert!(fix_prompt.contains("Missing input validation"));
    }

    #[test]
    fn zero_iterations_completes_after_planning() {
        let team = ScriptedTeam::default();
        team.planner.push_ok("plan");
        let mut orchestrator = RefinementOrchestrator::new(team.build(), 0);

        let result = orchestrator.run("task", None);

        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.iterations, 0);
        assert!(!result.approved);
        assert_eq!(result.history.len(), 1);
        assert_eq!(team.coder.calls(), 0);
    }

    #[test]
    fn add_to_knowledge_requires_a_store() {
        let orchestrator = RefinementOrchestrator::new(ScriptedTeam::default().build(), 1);
        let err = orchestrator
            .add_to_knowledge("code", None)
            .expect_err("disabled");
        assert!(err.to_string().contains("disabled"));

        let knowledge = RecordingKnowledge::default();
        let orchestrator = RefinementOrchestrator::new(ScriptedTeam::default().build(), 1)
            .with_knowledge(Box::new(knowledge.clone()));
        orchestrator
            .add_to_knowledge("snippet", Some("notes.md"))
            .expect("stored");
        let stored = knowledge.stored();
        assert_eq!(stored[0].0, "snippet");
        assert_eq!(stored[0].1["source"], "notes.md");
    }

    #[test]
    fn task_metadata_truncates_long_tasks() {
        let metadata = task_metadata(&"x".repeat(500), TaskStatus::Completed.as_str());
        assert_eq!(metadata["task"].chars().count(), 200);
        assert_eq!(metadata["status"], "completed");
    }
}
