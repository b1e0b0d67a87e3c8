//! Reviewer agent: critiques code and decides approval.

use anyhow::Result;
use minijinja::context;

use crate::core::approval::classify;
use crate::io::prompt::{Template, render};

use super::Agent;

pub struct Reviewer {
    agent: Agent,
}

impl Reviewer {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    /// General review, optionally against stated requirements.
    pub fn review_code(&mut self, code: &str, requirements: Option<&str>) -> Result<String> {
        let prompt = render(Template::Review, context! { code => code.trim() })?;
        let requirements = requirements
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| format!("## Requirements\n{r}"));
        self.agent.ask(&prompt, requirements.as_deref())
    }

    /// Review `code` for adherence to `plan`.
    pub fn check_implementation(&mut self, code: &str, plan: &str) -> Result<String> {
        let prompt = render(
            Template::CheckImplementation,
            context! { code => code.trim(), plan => plan.trim() },
        )?;
        self.agent.ask(&prompt, None)
    }

    /// Review limited to security problems.
    pub fn security_review(&mut self, code: &str) -> Result<String> {
        let prompt = render(Template::SecurityReview, context! { code => code.trim() })?;
        self.agent.ask(&prompt, None)
    }

    /// Review limited to performance problems.
    pub fn performance_review(&mut self, code: &str) -> Result<String> {
        let prompt = render(Template::PerformanceReview, context! { code => code.trim() })?;
        self.agent.ask(&prompt, None)
    }

    pub fn is_approved(review: &str) -> bool {
        classify(review).is_approved()
    }
}
