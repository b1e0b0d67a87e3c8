//! Role-bound agents.
//!
//! An [`Agent`] pairs a [`LanguageModel`] with a role's system prompt and a
//! bounded conversation history. The role wrappers ([`Planner`], [`Coder`],
//! [`Reviewer`]) only decide what to ask; prompt assembly and memory live
//! here.
//!
//! Model failures surface as `anyhow::Error` wrapping an
//! [`AgentCallError`], so orchestrators can `downcast_ref` them.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::history::{ConversationHistory, Speaker};
use crate::core::types::{AgentCallError, AgentRole};
use crate::io::config::AppConfig;
use crate::io::model::{CommandModel, LanguageModel};
use crate::io::prompt::{AgentPrompt, compose_agent_prompt, system_prompt};

pub mod coder;
pub mod planner;
pub mod reviewer;

pub use coder::Coder;
pub use planner::Planner;
pub use reviewer::Reviewer;

/// Prompt-shaping knobs shared by all agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    pub history_window: usize,
    pub prompt_budget_bytes: usize,
}

impl AgentSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            history_window: cfg.history_window,
            prompt_budget_bytes: cfg.models.prompt_budget_bytes,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            history_window: 5,
            prompt_budget_bytes: 200_000,
        }
    }
}

pub struct Agent {
    role: AgentRole,
    model: Box<dyn LanguageModel>,
    system: String,
    history: ConversationHistory,
    prompt_budget_bytes: usize,
}

impl Agent {
    pub fn new(role: AgentRole, model: Box<dyn LanguageModel>, settings: AgentSettings) -> Result<Self> {
        Ok(Self {
            role,
            model,
            system: system_prompt(role)?,
            history: ConversationHistory::new(settings.history_window),
            prompt_budget_bytes: settings.prompt_budget_bytes,
        })
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// One model turn. The exchange is remembered only when the call succeeds.
    #[instrument(skip_all, fields(role = %self.role))]
    pub fn ask(&mut self, task: &str, context: Option<&str>) -> Result<String> {
        let history = self.history.render();
        let prompt = compose_agent_prompt(
            &AgentPrompt {
                system: &self.system,
                context,
                history: Some(history.as_str()),
                task,
            },
            self.prompt_budget_bytes,
        )?;
        debug!(prompt_bytes = prompt.len(), "sending prompt");

        let response = self
            .model
            .complete(&prompt)
            .map_err(|err| anyhow::Error::new(AgentCallError::new(self.role, &err)))?;

        self.history.push(Speaker::User, task);
        self.history.push(Speaker::Assistant, response.clone());
        Ok(response)
    }
}

/// Recover the typed failure from an agent error, or attribute it to `role`.
pub fn call_error(role: AgentRole, err: &anyhow::Error) -> AgentCallError {
    err.downcast_ref::<AgentCallError>()
        .cloned()
        .unwrap_or_else(|| AgentCallError::new(role, err))
}

/// The planner, coder and reviewer used by both orchestrators.
pub struct AgentTeam {
    pub planner: Planner,
    pub coder: Coder,
    pub reviewer: Reviewer,
}

impl AgentTeam {
    pub fn new(
        planner: Box<dyn LanguageModel>,
        coder: Box<dyn LanguageModel>,
        reviewer: Box<dyn LanguageModel>,
        settings: AgentSettings,
    ) -> Result<Self> {
        Ok(Self {
            planner: Planner::new(Agent::new(AgentRole::Planner, planner, settings)?),
            coder: Coder::new(Agent::new(AgentRole::Coder, coder, settings)?),
            reviewer: Reviewer::new(Agent::new(AgentRole::Reviewer, reviewer, settings)?),
        })
    }

    /// Team backed by the configured model commands.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let model = |role| -> Box<dyn LanguageModel> {
            Box::new(CommandModel::from_config(&cfg.models, cfg.models.command_for(role)))
        };
        Self::new(
            model(AgentRole::Planner),
            model(AgentRole::Coder),
            model(AgentRole::Reviewer),
            AgentSettings::from_config(cfg),
        )
    }

    pub fn clear_history(&mut self) {
        self.planner.agent_mut().clear_history();
        self.coder.agent_mut().clear_history();
        self.reviewer.agent_mut().clear_history();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;

    fn agent(model: &ScriptedModel, window: usize) -> Agent {
        Agent::new(
            AgentRole::Planner,
            Box::new(model.clone()),
            AgentSettings {
                history_window: window,
                prompt_budget_bytes: 100_000,
            },
        )
        .expect("agent")
    }

    #[test]
    fn ask_includes_context_and_prior_turns() {
        let model = ScriptedModel::new(["first answer", "second answer"]);
        let mut agent = agent(&model, 5);

        agent.ask("first task", Some("useful context")).expect("first");
        agent.ask("second task", None).expect("second");

        let prompts = model.prompts();
        assert!(prompts[0].contains("## Relevant Context\nuseful context"));
        assert!(!prompts[0].contains("## Conversation History"));
        assert!(prompts[1].contains("USER: first task\nASSISTANT: first answer"));
        assert!(prompts[1].ends_with("## Current Task\nsecond task"));
    }

    #[test]
    fn failures_are_typed_and_not_remembered() {
        let model = ScriptedModel::new(Vec::<String>::new());
        model.push_err("connection refused");
        let mut agent = agent(&model, 5);

        let err = agent.ask("task", None).expect_err("should fail");
        let typed = err.downcast_ref::<AgentCallError>().expect("typed error");
        assert_eq!(typed.role, AgentRole::Planner);
        assert!(typed.message.contains("connection refused"));
        assert!(agent.history().is_empty());
        assert_eq!(call_error(AgentRole::Coder, &err).role, AgentRole::Planner);
    }

    #[test]
    fn history_is_bounded_by_window() {
        let model = ScriptedModel::repeating("ok");
        let mut agent = agent(&model, 2);
        for i in 0..4 {
            agent.ask(&format!("task {i}"), None).expect("ask");
        }
        assert_eq!(agent.history().len(), 2);
        agent.clear_history();
        assert!(agent.history().is_empty());
    }
}
