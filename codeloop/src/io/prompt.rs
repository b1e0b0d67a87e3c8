//! Prompt rendering.
//!
//! Every prompt is a minijinja template compiled into the binary. Agent
//! prompts are assembled from marked sections so that, when a prompt exceeds
//! its byte budget, the least important sections can be dropped first.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::types::AgentRole;

/// A template compiled into the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Agent,
    PlannerSystem,
    CoderSystem,
    ReviewerSystem,
    ReasonerSystem,
    RefinePlan,
    Implement,
    Fix,
    Review,
    CheckImplementation,
    Strategic,
    Tactical,
    Operational,
    Reflective,
    AgenticPlan,
    AgenticCode,
    AgenticFix,
    Refactor,
    AddFeature,
    AnalyzeCodebase,
    SecurityReview,
    PerformanceReview,
    ChainOfThought,
    SelfConsistency,
    ReflexionSolve,
    ReflexionCritique,
    ReflexionImprove,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::Agent => "agent",
            Template::PlannerSystem => "planner_system",
            Template::CoderSystem => "coder_system",
            Template::ReviewerSystem => "reviewer_system",
            Template::ReasonerSystem => "reasoner_system",
            Template::RefinePlan => "refine_plan",
            Template::Implement => "implement",
            Template::Fix => "fix",
            Template::Review => "review",
            Template::CheckImplementation => "check",
            Template::Strategic => "strategic",
            Template::Tactical => "tactical",
            Template::Operational => "operational",
            Template::Reflective => "reflective",
            Template::AgenticPlan => "agentic_plan",
            Template::AgenticCode => "agentic_code",
            Template::AgenticFix => "agentic_fix",
            Template::Refactor => "refactor",
            Template::AddFeature => "add_feature",
            Template::AnalyzeCodebase => "analyze_codebase",
            Template::SecurityReview => "security_review",
            Template::PerformanceReview => "performance_review",
            Template::ChainOfThought => "chain_of_thought",
            Template::SelfConsistency => "self_consistency",
            Template::ReflexionSolve => "reflexion_solve",
            Template::ReflexionCritique => "reflexion_critique",
            Template::ReflexionImprove => "reflexion_improve",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Template::Agent => include_str!("prompts/agent.md"),
            Template::PlannerSystem => include_str!("prompts/planner_system.md"),
            Template::CoderSystem => include_str!("prompts/coder_system.md"),
            Template::ReviewerSystem => include_str!("prompts/reviewer_system.md"),
            Template::ReasonerSystem => include_str!("prompts/reasoner_system.md"),
            Template::RefinePlan => include_str!("prompts/refine_plan.md"),
            Template::Implement => include_str!("prompts/implement.md"),
            Template::Fix => include_str!("prompts/fix.md"),
            Template::Review => include_str!("prompts/review.md"),
            Template::CheckImplementation => include_str!("prompts/check.md"),
            Template::Strategic => include_str!("prompts/strategic.md"),
            Template::Tactical => include_str!("prompts/tactical.md"),
            Template::Operational => include_str!("prompts/operational.md"),
            Template::Reflective => include_str!("prompts/reflective.md"),
            Template::AgenticPlan => include_str!("prompts/agentic_plan.md"),
            Template::AgenticCode => include_str!("prompts/agentic_code.md"),
            Template::AgenticFix => include_str!("prompts/agentic_fix.md"),
            Template::Refactor => include_str!("prompts/refactor.md"),
            Template::AddFeature => include_str!("prompts/add_feature.md"),
            Template::AnalyzeCodebase => include_str!("prompts/analyze_codebase.md"),
            Template::SecurityReview => include_str!("prompts/security_review.md"),
            Template::PerformanceReview => include_str!("prompts/performance_review.md"),
            Template::ChainOfThought => include_str!("prompts/chain_of_thought.md"),
            Template::SelfConsistency => include_str!("prompts/self_consistency.md"),
            Template::ReflexionSolve => include_str!("prompts/reflexion_solve.md"),
            Template::ReflexionCritique => include_str!("prompts/reflexion_critique.md"),
            Template::ReflexionImprove => include_str!("prompts/reflexion_improve.md"),
        }
    }

    /// System prompt template for an agent role.
    pub fn system_for(role: AgentRole) -> Template {
        match role {
            AgentRole::Planner => Template::PlannerSystem,
            AgentRole::Coder => Template::CoderSystem,
            AgentRole::Reviewer => Template::ReviewerSystem,
            AgentRole::Reasoner => Template::ReasonerSystem,
        }
    }
}

/// Render a template with the given context.
pub fn render<S: Serialize>(template: Template, ctx: S) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(template.name(), template.source())
        .with_context(|| format!("compile template {}", template.name()))?;
    let rendered = env
        .get_template(template.name())?
        .render(ctx)
        .with_context(|| format!("render template {}", template.name()))?;
    Ok(rendered.trim().to_string())
}

pub fn system_prompt(role: AgentRole) -> Result<String> {
    render(Template::system_for(role), context! {})
}

/// Inputs for one agent turn.
#[derive(Debug, Clone, Default)]
pub struct AgentPrompt<'a> {
    pub system: &'a str,
    pub context: Option<&'a str>,
    pub history: Option<&'a str>,
    pub task: &'a str,
}

/// Render an agent prompt, dropping droppable sections to fit `budget_bytes`.
///
/// Drop order: history -> context. Required sections are never dropped, so
/// the result may still exceed the budget.
pub fn compose_agent_prompt(prompt: &AgentPrompt<'_>, budget_bytes: usize) -> Result<String> {
    let rendered = render(
        Template::Agent,
        context! {
            system => prompt.system.trim(),
            context => prompt.context.map(str::trim).filter(|s| !s.is_empty()),
            history => prompt.history.map(str::trim).filter(|s| !s.is_empty()),
            task => prompt.task.trim(),
        },
    )?;

    let mut sections = parse_sections(&rendered);
    apply_budget_to_sections(&mut sections, budget_bytes);
    Ok(render_sections(&sections))
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, content_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|(next_start, ..)| *next_start)
            .unwrap_or(rendered.len());
        let content = rendered[*content_start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in ["history", "context"] {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped prompt section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total > budget {
        warn!(total, budget, "prompt exceeds budget after dropping optional sections");
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_renders() {
        let all = [
            Template::Agent,
            Template::PlannerSystem,
            Template::CoderSystem,
            Template::ReviewerSystem,
            Template::ReasonerSystem,
            Template::RefinePlan,
            Template::Implement,
            Template::Fix,
            Template::Review,
            Template::CheckImplementation,
            Template::Strategic,
            Template::Tactical,
            Template::Operational,
            Template::Reflective,
            Template::AgenticPlan,
            Template::AgenticCode,
            Template::AgenticFix,
            Template::Refactor,
            Template::AddFeature,
            Template::AnalyzeCodebase,
            Template::SecurityReview,
            Template::PerformanceReview,
            Template::ChainOfThought,
            Template::SelfConsistency,
            Template::ReflexionSolve,
            Template::ReflexionCritique,
            Template::ReflexionImprove,
        ];
        for template in all {
            let rendered = render(template, context! {}).expect(template.name());
            assert!(!rendered.is_empty(), "{} rendered empty", template.name());
        }
    }

    #[test]
    fn agent_prompt_orders_sections() {
        let prompt = AgentPrompt {
            system: "SYSTEM",
            context: Some("CONTEXT"),
            history: Some("USER: earlier"),
            task: "TASK",
        };
        let content = compose_agent_prompt(&prompt, 10_000).expect("compose");

        let system = content.find("SYSTEM").expect("system");
        let context = content.find("## Relevant Context").expect("context");
        let history = content.find("## Conversation History").expect("history");
        let task = content.find("## Current Task\nTASK").expect("task");
        assert!(system < context && context < history && history < task);
        assert!(!content.contains("<!--"));
    }

    #[test]
    fn absent_sections_are_omitted() {
        let prompt = AgentPrompt {
            system: "SYSTEM",
            context: Some("   "),
            history: None,
            task: "TASK",
        };
        let content = compose_agent_prompt(&prompt, 10_000).expect("compose");
        assert!(!content.contains("Relevant Context"));
        assert!(!content.contains("Conversation History"));
    }

    #[test]
    fn budget_drops_history_before_context() {
        let history = "h".repeat(500);
        let prompt = AgentPrompt {
            system: "SYSTEM",
            context: Some("CONTEXT"),
            history: Some(&history),
            task: "TASK",
        };
        let content = compose_agent_prompt(&prompt, 200).expect("compose");
        assert!(!content.contains("Conversation History"));
        assert!(content.contains("CONTEXT"));
        assert!(content.contains("TASK"));
    }

    #[test]
    fn agentic_fix_lists_errors_or_placeholder() {
        let with_errors = render(
            Template::AgenticFix,
            context! { code => "c", review => "r", errors => vec!["boom", "bang"] },
        )
        .expect("render");
        assert!(with_errors.contains("boom\nbang"));

        let without = render(
            Template::AgenticFix,
            context! { code => "c", review => "r", errors => Vec::<String>::new() },
        )
        .expect("render");
        assert!(without.contains("No execution errors"));
    }
}
