//! Planner agent: turns tasks into implementation plans.

use anyhow::Result;
use minijinja::context;

use crate::io::prompt::{Template, render};

use super::Agent;

pub struct Planner {
    agent: Agent,
}

impl Planner {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    /// Plan `task`, optionally grounded in retrieved or existing-code context.
    pub fn plan(&mut self, task: &str, context: Option<&str>) -> Result<String> {
        self.agent.ask(task, context)
    }

    /// Revise `plan` to address feedback from the coder or reviewer.
    pub fn refine_plan(&mut self, plan: &str, feedback: &str) -> Result<String> {
        let prompt = render(
            Template::RefinePlan,
            context! { plan => plan.trim(), feedback => feedback.trim() },
        )?;
        self.agent.ask(&prompt, None)
    }

    /// Assess an existing codebase and suggest what to do next.
    pub fn analyze_codebase(&mut self, summary: &str) -> Result<String> {
        let prompt = render(Template::AnalyzeCodebase, context! { summary => summary.trim() })?;
        self.agent.ask(&prompt, None)
    }

    /// Send an already-rendered prompt.
    pub fn run(&mut self, prompt: &str) -> Result<String> {
        self.agent.ask(prompt, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentSettings;
    use crate::core::types::AgentRole;
    use crate::test_support::ScriptedModel;

    #[test]
    fn refine_plan_carries_plan_and_feedback() {
        let model = ScriptedModel::new(["refined"]);
        let agent = Agent::new(AgentRole::Planner, Box::new(model.clone()), AgentSettings::default())
            .expect("agent");
        let mut planner = Planner::new(agent);

        let refined = planner
            .refine_plan("1. parse\n2. print", "step 2 must handle empty input")
            .expect("refine");

        assert_eq!(refined, "refined");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("## Original Plan\n1. parse\n2. print"));
        assert!(prompt.contains("## Feedback Received\nstep 2 must handle empty input"));
    }

    #[test]
    fn analyze_codebase_embeds_summary() {
        let model = ScriptedModel::new(["analysis"]);
        let agent = Agent::new(AgentRole::Planner, Box::new(model.clone()), AgentSettings::default())
            .expect("agent");
        let analysis = Planner::new(agent)
            .analyze_codebase("A CLI with one 900-line main.rs")
            .expect("analyze");
        assert_eq!(analysis, "analysis");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("## Codebase Summary\nA CLI with one 900-line main.rs"));
        assert!(prompt.contains("Technical debt"));
    }
}
