//! Coder agent: implements plans and applies review feedback.

use anyhow::Result;
use minijinja::context;

use crate::io::prompt::{Template, render};

use super::Agent;

pub struct Coder {
    agent: Agent,
}

impl Coder {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    /// Implement `plan`. Existing code, when given, is passed as context.
    pub fn implement(&mut self, plan: &str, existing_code: Option<&str>) -> Result<String> {
        let prompt = render(Template::Implement, context! { plan => plan.trim() })?;
        let existing = existing_code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| format!("## Existing Code\n{code}"));
        self.agent.ask(&prompt, existing.as_deref())
    }

    /// Rewrite `code` so it addresses `issues`.
    pub fn fix(&mut self, code: &str, issues: &str) -> Result<String> {
        let prompt = render(
            Template::Fix,
            context! { code => code.trim(), issues => issues.trim() },
        )?;
        self.agent.ask(&prompt, None)
    }

    /// Restructure `code` toward `goals` while keeping its behavior.
    pub fn refactor(&mut self, code: &str, goals: &str) -> Result<String> {
        let prompt = render(
            Template::Refactor,
            context! { code => code.trim(), goals => goals.trim() },
        )?;
        self.agent.ask(&prompt, None)
    }

    /// Extend `existing_code` with `feature`; the code travels as context.
    pub fn add_feature(&mut self, existing_code: &str, feature: &str) -> Result<String> {
        let prompt = render(Template::AddFeature, context! { feature => feature.trim() })?;
        let existing = format!("## Existing Code\n{}", existing_code.trim());
        self.agent.ask(&prompt, Some(&existing))
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

    fn coder(model: &ScriptedModel) -> Coder {
        Coder::new(
            Agent::new(AgentRole::Coder, Box::new(model.clone()), AgentSettings::default())
                .expect("agent"),
        )
    }

    #[test]
    fn implement_passes_existing_code_as_context() {
        let model = ScriptedModel::new(["code"]);
        coder(&model)
            .implement("add a flag", Some("fn main() {}"))
            .expect("implement");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("## Relevant Context\n## Existing Code\nfn main() {}"));
        assert!(prompt.contains("## Implementation Plan to Follow\nadd a flag"));
    }

    #[test]
    fn fix_includes_code_and_issues() {
        let model = ScriptedModel::new(["fixed"]);
        coder(&model)
            .fix("print(1", "unbalanced parenthesis")
            .expect("fix");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("## Code with Issues\nprint(1"));
        assert!(prompt.contains("## Issues to Fix\nunbalanced parenthesis"));
    }

    #[test]
    fn refactor_sends_code_and_goals() {
        let model = ScriptedModel::new(["refactored"]);
        let out = coder(&model)
            .refactor("def f(x): return x*2", "name things clearly")
            .expect("refactor");
        assert_eq!(out, "refactored");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("## Code to Refactor\ndef f(x): return x*2"));
        assert!(prompt.contains("## Refactoring Goals\nname things clearly"));
    }

    #[test]
    fn add_feature_passes_existing_code_as_context() {
        let model = ScriptedModel::new(["extended"]);
        coder(&model)
            .add_feature("fn main() {}", "print a greeting")
            .expect("feature");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("## Relevant Context\n## Existing Code\nfn main() {}"));
        assert!(prompt.contains("## Feature to Add\nprint a greeting"));
    }
}
