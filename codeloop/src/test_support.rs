//! Scripted collaborators for deterministic tests.
//!
//! Every fake shares its state through `Rc<RefCell<..>>`, so a test keeps a
//! clone to inspect recorded calls after handing the original to the code
//! under test.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{Result, anyhow, bail};

use crate::agents::{AgentSettings, AgentTeam};
use crate::io::knowledge::{KnowledgeStore, Metadata};
use crate::io::model::LanguageModel;
use crate::io::terminal::{CommandResult, CommandRunner};

#[derive(Debug, Default)]
struct ModelScript {
    responses: VecDeque<Result<String, String>>,
    fallback: Option<String>,
    prompts: Vec<String>,
}

/// Model that replays queued responses in order.
///
/// Once the queue is empty it answers with the repeating fallback, if set,
/// and errors otherwise.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    script: Rc<RefCell<ModelScript>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::default();
        for response in responses {
            model.push_ok(response);
        }
        model
    }

    /// Model that answers every prompt with `response`.
    pub fn repeating(response: impl Into<String>) -> Self {
        let model = Self::default();
        model.script.borrow_mut().fallback = Some(response.into());
        model
    }

    pub fn push_ok(&self, response: impl Into<String>) {
        self.script
            .borrow_mut()
            .responses
            .push_back(Ok(response.into()));
    }

    pub fn push_err(&self, message: impl Into<String>) {
        self.script
            .borrow_mut()
            .responses
            .push_back(Err(message.into()));
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.script.borrow().prompts.clone()
    }

    pub fn calls(&self) -> usize {
        self.script.borrow().prompts.len()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, prompt: &str) -> Result<String> {
        let mut script = self.script.borrow_mut();
        script.prompts.push(prompt.to_string());
        match script.responses.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => match &script.fallback {
                Some(response) => Ok(response.clone()),
                None => bail!("scripted model exhausted after {} calls", script.prompts.len()),
            },
        }
    }
}

/// Command runner that records commands and replays queued results.
///
/// With an empty queue every command succeeds with no output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    results: Rc<RefCell<VecDeque<CommandResult>>>,
    commands: Rc<RefCell<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: CommandResult) {
        self.results.borrow_mut().push_back(result);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(&self, command: &str) -> Result<CommandResult> {
        self.commands.borrow_mut().push(command.to_string());
        Ok(self
            .results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| exit_with(0, "", "")))
    }
}

pub fn exit_with(code: i32, stdout: &str, stderr: &str) -> CommandResult {
    CommandResult {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: Some(code),
        timed_out: false,
    }
}

/// In-memory knowledge store with a fixed retrieval answer.
#[derive(Debug, Clone, Default)]
pub struct RecordingKnowledge {
    context: Rc<RefCell<String>>,
    stored: Rc<RefCell<Vec<(String, Metadata)>>>,
    failing: Rc<RefCell<bool>>,
}

impl RecordingKnowledge {
    pub fn with_context(context: impl Into<String>) -> Self {
        let store = Self::default();
        *store.context.borrow_mut() = context.into();
        store
    }

    /// Store whose every call fails.
    pub fn failing() -> Self {
        let store = Self::default();
        *store.failing.borrow_mut() = true;
        store
    }

    pub fn stored(&self) -> Vec<(String, Metadata)> {
        self.stored.borrow().clone()
    }
}

impl KnowledgeStore for RecordingKnowledge {
    fn store_code(&self, code: &str, metadata: &Metadata) -> Result<()> {
        if *self.failing.borrow() {
            bail!("knowledge store unavailable");
        }
        self.stored
            .borrow_mut()
            .push((code.to_string(), metadata.clone()));
        Ok(())
    }

    fn get_context(&self, _task: &str) -> Result<String> {
        if *self.failing.borrow() {
            bail!("knowledge store unavailable");
        }
        Ok(self.context.borrow().clone())
    }
}

/// Scripted models for a planner/coder/reviewer team.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTeam {
    pub planner: ScriptedModel,
    pub coder: ScriptedModel,
    pub reviewer: ScriptedModel,
}

impl ScriptedTeam {
    pub fn build(&self) -> AgentTeam {
        AgentTeam::new(
            Box::new(self.planner.clone()),
            Box::new(self.coder.clone()),
            Box::new(self.reviewer.clone()),
            AgentSettings::default(),
        )
        .expect("system prompts render")
    }
}

pub fn approved_review() -> String {
    "## Review Summary\nAPPROVED\n\n## Critical Issues (Must Fix)\nNone identified\n\n## Positive Aspects\nClear structure.\n".to_string()
}

/// A review that approves in its summary but lists a blocking issue.
pub fn rejecting_review(issue: &str) -> String {
    format!("## Review Summary\nAPPROVED\n\n## Critical Issues (Must Fix)\n- {issue}\n")
}

pub fn needs_changes_review() -> String {
    "## Review Summary\nNEEDS_CHANGES\n\n## Critical Issues (Must Fix)\n- Missing input validation\n".to_string()
}

/// A generated-code document with one `## File:` block.
pub fn file_document(path: &str, body: &str) -> String {
    format!("## File: `{path}`\n```python\n{body}\n```\n\n## Explanation\nDone.\n")
}
