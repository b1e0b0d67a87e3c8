//! Hierarchical tree-of-thought reasoning over four levels.
//!
//! Strategic approaches become sibling roots and the most confident one is
//! selected. Only the selected root is broken into tactical sub-problems, each
//! tactical node gets exactly one operational child, and a single reflective
//! pass critiques the whole chain. Model output is parsed leniently; a reply
//! that is not JSON becomes a single node holding the raw text.
//!
//! The same reasoner also runs three flat strategies that need no tree:
//! chain of thought, self-consistency voting and reflexion.

use anyhow::{Result, anyhow};
use minijinja::context;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::agents::{Agent, AgentSettings};
use crate::core::payload::{Payload, item_confidence, item_thought};
use crate::core::reasoning::{
    NodeId, ReasoningLevel, ReasoningTrace, ReasoningTree, Recommendation, synthesize_answer,
};
use crate::core::strategy::{critique_accepts, final_answer, majority};
use crate::core::types::AgentRole;
use crate::io::config::AppConfig;
use crate::io::model::{CommandModel, LanguageModel};
use crate::io::prompt::{Template, render};

pub const DEFAULT_BRANCHING_FACTOR: usize = 3;
pub const DEFAULT_SAMPLES: usize = 3;
pub const DEFAULT_REFLEXION_ROUNDS: usize = 3;

/// Outcome of self-consistency voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Consensus {
    /// The first full response that reached the winning answer.
    pub response: String,
    pub answer: String,
    pub votes: usize,
    pub samples: usize,
}

/// Outcome of a reflexion loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reflexion {
    pub solution: String,
    /// Critiques in order; each one but an accepting last one led to a revision.
    pub critiques: Vec<String>,
    /// Whether the last critique accepted the solution.
    pub accepted: bool,
}

pub struct HierarchicalReasoner {
    agent: Agent,
    branching_factor: usize,
}

impl HierarchicalReasoner {
    /// Each reasoning call is independent, so the agent keeps no history.
    pub fn new(model: Box<dyn LanguageModel>, settings: AgentSettings) -> Result<Self> {
        let settings = AgentSettings {
            history_window: 0,
            ..settings
        };
        Ok(Self {
            agent: Agent::new(AgentRole::Reasoner, model, settings)?,
            branching_factor: DEFAULT_BRANCHING_FACTOR,
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let model = CommandModel::from_config(&cfg.models, cfg.models.command_for(AgentRole::Reasoner));
        Self::new(Box::new(model), AgentSettings::from_config(cfg))
    }

    /// Number of strategic approaches requested from the model.
    pub fn with_branching_factor(mut self, branching_factor: usize) -> Self {
        self.branching_factor = branching_factor.max(1);
        self
    }

    /// Run all four levels. Errors only when a model call fails.
    #[instrument(skip_all, fields(branching = self.branching_factor))]
    pub fn reason(&mut self, problem: &str) -> Result<ReasoningTrace> {
        let mut tree = ReasoningTree::new();
        let mut reasoning_path = Vec::with_capacity(4);

        let strategic = self.strategic(problem, &mut tree)?;
        let chosen = tree
            .select_best(&strategic)
            .ok_or_else(|| anyhow!("strategic level produced no nodes"))?;
        tree.select(chosen);
        let chosen_thought = node_thought(&tree, chosen);
        info!(roots = strategic.len(), selected = %chosen, "strategic level done");
        reasoning_path.push(format!(
            "strategic: {} approach(es), selected {chosen} ({:.2})",
            strategic.len(),
            tree.get(chosen).map(|n| n.confidence).unwrap_or_default()
        ));

        let tactical = self.tactical(problem, &chosen_thought, chosen, &mut tree)?;
        info!(count = tactical.len(), "tactical level done");
        reasoning_path.push(format!("tactical: {} sub-problem(s)", tactical.len()));

        for &sub_problem in &tactical {
            self.operational(problem, &chosen_thought, sub_problem, &mut tree)?;
        }
        info!(count = tactical.len(), "operational level done");
        reasoning_path.push(format!("operational: {} implementation(s)", tactical.len()));

        let (reflective, recommendation) = self.reflective(problem, &mut tree)?;
        let confidence = tree.get(reflective).map(|n| n.confidence).unwrap_or_default();
        info!(recommendation = recommendation.as_str(), confidence, "reflective level done");
        reasoning_path.push(format!(
            "reflective: {} ({confidence:.2})",
            recommendation.as_str()
        ));

        Ok(ReasoningTrace {
            problem: problem.to_string(),
            final_answer: synthesize_answer(&tree),
            reasoning_path,
            total_nodes: tree.len(),
            selected_path: tree.selected_path(),
            tree,
        })
    }

    /// One step-by-step answer.
    pub fn chain_of_thought(&mut self, problem: &str) -> Result<String> {
        let prompt = render(Template::ChainOfThought, context! { problem => problem })?;
        self.agent.ask(&prompt, None)
    }

    /// Sample `samples` independent answers and keep the most common one.
    #[instrument(skip_all, fields(samples = samples))]
    pub fn self_consistency(&mut self, problem: &str, samples: usize) -> Result<Consensus> {
        let samples = samples.max(1);
        let prompt = render(Template::SelfConsistency, context! { problem => problem })?;
        let mut responses = Vec::with_capacity(samples);
        for _ in 0..samples {
            responses.push(self.agent.ask(&prompt, None)?);
        }
        let answers: Vec<String> = responses.iter().map(|r| final_answer(r)).collect();
        let (winner, votes) =
            majority(&answers).ok_or_else(|| anyhow!("self-consistency produced no samples"))?;
        info!(votes, samples, "self-consistency vote");
        Ok(Consensus {
            response: responses.swap_remove(winner),
            answer: answers[winner].clone(),
            votes,
            samples,
        })
    }

    /// Solve, then alternate critique and revision until a critique accepts the
    /// solution or `max_rounds` solutions have been produced.
    #[instrument(skip_all, fields(max_rounds = max_rounds))]
    pub fn reflexion(&mut self, problem: &str, max_rounds: usize) -> Result<Reflexion> {
        let prompt = render(Template::ReflexionSolve, context! { problem => problem })?;
        let mut solution = self.agent.ask(&prompt, None)?;
        let mut critiques = Vec::new();
        let mut accepted = false;

        for round in 1..max_rounds.max(1) {
            let prompt = render(
                Template::ReflexionCritique,
                context! { problem => problem, solution => solution.trim() },
            )?;
            let critique = self.agent.ask(&prompt, None)?;
            critiques.push(critique.clone());
            if critique_accepts(&critique) {
                info!(round, "critique accepted the solution");
                accepted = true;
                break;
            }
            debug!(round, "revising after critique");
            let prompt = render(
                Template::ReflexionImprove,
                context! { problem => problem, solution => solution.trim(), critique => critique.trim() },
            )?;
            solution = self.agent.ask(&prompt, None)?;
        }

        Ok(Reflexion {
            solution,
            critiques,
            accepted,
        })
    }

    fn strategic(&mut self, problem: &str, tree: &mut ReasoningTree) -> Result<Vec<NodeId>> {
        let prompt = render(
            Template::Strategic,
            context! { problem => problem, branching => self.branching_factor },
        )?;
        let payload = Payload::parse(&self.agent.ask(&prompt, None)?);

        let mut roots = Vec::new();
        match payload.list("approaches") {
            Some(approaches) => {
                for approach in approaches {
                    roots.push(tree.add_node(
                        ReasoningLevel::Strategic,
                        item_thought(approach),
                        item_confidence(approach),
                        None,
                    )?);
                }
            }
            None => roots.push(tree.add_node(
                ReasoningLevel::Strategic,
                payload.to_thought(),
                payload.confidence("confidence"),
                None,
            )?),
        }
        Ok(roots)
    }

    fn tactical(
        &mut self,
        problem: &str,
        strategic: &str,
        parent: NodeId,
        tree: &mut ReasoningTree,
    ) -> Result<Vec<NodeId>> {
        let prompt = render(
            Template::Tactical,
            context! { problem => problem, strategic => strategic },
        )?;
        let payload = Payload::parse(&self.agent.ask(&prompt, None)?);
        let confidence = payload.confidence("confidence");

        let mut children = Vec::new();
        match payload.list("sub_problems") {
            Some(sub_problems) => {
                for sub_problem in sub_problems {
                    children.push(tree.add_node(
                        ReasoningLevel::Tactical,
                        item_thought(sub_problem),
                        confidence,
                        Some(parent),
                    )?);
                }
            }
            None => children.push(tree.add_node(
                ReasoningLevel::Tactical,
                payload.to_thought(),
                confidence,
                Some(parent),
            )?),
        }
        Ok(children)
    }

    fn operational(
        &mut self,
        problem: &str,
        strategic: &str,
        parent: NodeId,
        tree: &mut ReasoningTree,
    ) -> Result<NodeId> {
        let sub_problem = node_thought(tree, parent);
        let prompt = render(
            Template::Operational,
            context! { problem => problem, strategic => strategic, sub_problem => sub_problem },
        )?;
        let payload = Payload::parse(&self.agent.ask(&prompt, None)?);
        debug!(parent = %parent, structured = payload.is_structured(), "operational node");
        Ok(tree.add_node(
            ReasoningLevel::Operational,
            payload.to_thought(),
            payload.confidence("confidence"),
            Some(parent),
        )?)
    }

    fn reflective(
        &mut self,
        problem: &str,
        tree: &mut ReasoningTree,
    ) -> Result<(NodeId, Recommendation)> {
        let trace = tree
            .nodes()
            .iter()
            .filter(|node| match node.level {
                ReasoningLevel::Strategic => node.selected,
                ReasoningLevel::Tactical | ReasoningLevel::Operational => true,
                ReasoningLevel::Reflective => false,
            })
            .map(|node| format!("[{}] {}", node.level.label(), node.thought))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = render(
            Template::Reflective,
            context! { problem => problem, trace => trace },
        )?;
        let payload = Payload::parse(&self.agent.ask(&prompt, None)?);

        let recommendation = payload
            .str_field("recommendation")
            .map(Recommendation::parse)
            .unwrap_or(Recommendation::Proceed);
        let id = tree.add_node(
            ReasoningLevel::Reflective,
            payload.to_thought(),
            payload.confidence("overall_confidence"),
            None,
        )?;
        tree.set_evaluation(id, recommendation.as_str());
        Ok((id, recommendation))
    }
}

fn node_thought(tree: &ReasoningTree, id: NodeId) -> String {
    tree.get(id).map(|n| n.thought.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::payload::RAW_CONFIDENCE;
    use crate::core::types::AgentCallError;
    use crate::test_support::ScriptedModel;

    const STRATEGIC: &str = r#"{"problem_understanding": "cache", "approaches": [
        {"name": "lru", "confidence": 0.6},
        {"name": "ttl", "confidence": 0.9},
        {"name": "arc", "confidence": 0.9}
    ]}"#;
    const TACTICAL: &str = r#"{"sub_problems": [{"name": "store"}, {"name": "evict"}], "confidence": 0.8}"#;
    const OPERATIONAL: &str = r#"{"implementation": {"description": "Build it", "code_outline": "fn get() {}"}, "confidence": 0.75}"#;
    const REFLECTIVE: &str = r#"{"evaluation": {"strengths": ["simple"], "weaknesses": ["no metrics"]}, "overall_confidence": 0.65, "recommendation": "revise"}"#;

    fn reasoner(model: &ScriptedModel) -> HierarchicalReasoner {
        HierarchicalReasoner::new(Box::new(model.clone()), AgentSettings::default())
            .expect("reasoner")
    }

    #[test]
    fn builds_four_level_tree() {
        let model = ScriptedModel::new([STRATEGIC, TACTICAL, OPERATIONAL, OPERATIONAL, REFLECTIVE]);
        let trace = reasoner(&model).reason("design a cache").expect("reason");
        let tree = &trace.tree;

        let roots: Vec<_> = tree.roots().collect();
        assert_eq!(roots.len(), 3);
        let selected: Vec<_> = roots.iter().filter(|n| n.selected).collect();
        assert_eq!(selected.len(), 1);
        // Ties go to the first-seen root.
        assert!(selected[0].thought.contains("ttl"));
        assert_eq!(trace.selected_path, vec![selected[0].id]);

        let tactical: Vec<_> = tree.at_level(ReasoningLevel::Tactical).collect();
        assert_eq!(tactical.len(), 2);
        for node in &tactical {
            assert_eq!(node.parent, Some(selected[0].id));
            assert_eq!(node.confidence, 0.8);
            assert_eq!(node.children.len(), 1);
            let child = tree.get(node.children[0]).expect("child");
            assert_eq!(child.level, ReasoningLevel::Operational);
        }

        let reflective: Vec<_> = tree.at_level(ReasoningLevel::Reflective).collect();
        assert_eq!(reflective.len(), 1);
        assert!(reflective[0].parent.is_none() && reflective[0].children.is_empty());
        assert_eq!(reflective[0].confidence, 0.65);
        assert_eq!(trace.recommendation(), Recommendation::Revise);

        assert_eq!(trace.total_nodes, 3 + 2 + 2 + 1);
        assert_eq!(trace.reasoning_path.len(), 4);
        assert!(trace.final_answer.starts_with("## Solution\n"));
        assert!(trace.final_answer.contains("### Build it\n```\nfn get() {}\n```"));
        assert!(trace.final_answer.contains("- Strength: simple"));
        assert!(trace.final_answer.contains("- Weakness: no metrics"));
    }

    #[test]
    fn reflective_prompt_carries_selected_chain_only() {
        let model = ScriptedModel::new([STRATEGIC, TACTICAL, OPERATIONAL, OPERATIONAL, REFLECTIVE]);
        reasoner(&model).reason("design a cache").expect("reason");
        let prompts = model.prompts();
        let reflective = &prompts[4];
        assert!(reflective.contains("[STRATEGIC]"));
        assert!(reflective.contains("ttl"));
        assert!(!reflective.contains("\"lru\""));
        assert_eq!(reflective.matches("[TACTICAL]").count(), 2);
        assert_eq!(reflective.matches("[OPERATIONAL]").count(), 2);
        // The tactical prompt carries the selected approach as context.
        assert!(prompts[1].contains("ttl"));
    }

    #[test]
    fn malformed_output_degrades_to_raw_nodes() {
        let model = ScriptedModel::repeating("I think we should just write it.");
        let trace = reasoner(&model).reason("anything").expect("reason");

        assert_eq!(trace.total_nodes, 4);
        for node in trace.tree.nodes() {
            assert_eq!(node.thought, "I think we should just write it.");
            assert_eq!(node.confidence, RAW_CONFIDENCE);
        }
        assert_eq!(trace.recommendation(), Recommendation::Proceed);
        assert!(trace.final_answer.contains("I think we should just write it."));
    }

    #[test]
    fn structured_reply_without_approaches_is_one_root() {
        let model = ScriptedModel::new([r#"{"problem_understanding": "x"}"#]);
        model.push_ok("raw tactical");
        model.push_ok("raw operational");
        model.push_ok("raw reflection");
        let trace = reasoner(&model).reason("p").expect("reason");
        let root = trace.tree.roots().next().expect("root");
        assert_eq!(root.confidence, 0.7);
        assert!(root.selected);
    }

    #[test]
    fn node_ids_restart_on_each_call() {
        let model = ScriptedModel::repeating("raw");
        let mut reasoner = reasoner(&model);
        let first = reasoner.reason("a").expect("first");
        let second = reasoner.reason("b").expect("second");
        assert_eq!(first.tree.nodes()[0].id.to_string(), "node_1");
        assert_eq!(second.tree.nodes()[0].id.to_string(), "node_1");
    }

    #[test]
    fn branching_factor_reaches_strategic_prompt() {
        let model = ScriptedModel::repeating("raw");
        let mut reasoner = reasoner(&model).with_branching_factor(5);
        reasoner.reason("p").expect("reason");
        assert!(model.prompts()[0].contains("propose 5 distinct approaches"));
    }

    #[test]
    fn chain_of_thought_is_one_call() {
        let model = ScriptedModel::new(["Step 1: 2+2\nFinal Answer: 4"]);
        let answer = reasoner(&model).chain_of_thought("2+2?").expect("cot");
        assert!(answer.ends_with("Final Answer: 4"));
        assert_eq!(model.calls(), 1);
        assert!(model.prompts()[0].contains("Problem: 2+2?"));
    }

    #[test]
    fn self_consistency_keeps_the_majority_answer() {
        let model = ScriptedModel::new([
            "guess\nFinal Answer: 5",
            "careful\nFinal Answer: 4",
            "again\nFinal Answer: 4.",
        ]);
        let consensus = reasoner(&model).self_consistency("2+2?", 3).expect("vote");
        assert_eq!(consensus.answer, "4");
        assert_eq!(consensus.votes, 2);
        assert_eq!(consensus.samples, 3);
        assert!(consensus.response.starts_with("careful"));
        // Samples are independent; no history leaks between them.
        assert!(!model.prompts()[2].contains("ASSISTANT:"));
    }

    #[test]
    fn reflexion_stops_when_critique_accepts() {
        let model = ScriptedModel::new([
            "draft",
            "There is an error in the base case.",
            "revised",
            "The solution is correct.",
        ]);
        let outcome = reasoner(&model).reflexion("fib", 5).expect("reflexion");
        assert_eq!(outcome.solution, "revised");
        assert_eq!(outcome.critiques.len(), 2);
        assert!(outcome.accepted);
        assert_eq!(model.calls(), 4);
        let improve = &model.prompts()[2];
        assert!(improve.contains("## Current Solution\ndraft"));
        assert!(improve.contains("## Critique\nThere is an error in the base case."));
    }

    #[test]
    fn reflexion_respects_round_limit() {
        let model = ScriptedModel::repeating("Consider a faster approach.");
        let outcome = reasoner(&model).reflexion("sort", 3).expect("reflexion");
        assert!(!outcome.accepted);
        assert_eq!(outcome.critiques.len(), 2);
        // solve + 2 x (critique + improve)
        assert_eq!(model.calls(), 5);

        let model = ScriptedModel::repeating("only");
        let outcome = reasoner(&model).reflexion("sort", 1).expect("single round");
        assert!(outcome.critiques.is_empty());
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn model_failure_is_an_error() {
        let model = ScriptedModel::new([STRATEGIC]);
        model.push_err("model offline");
        let err = reasoner(&model).reason("p").expect_err("fails");
        let typed = err.downcast_ref::<AgentCallError>().expect("typed");
        assert_eq!(typed.role, AgentRole::Reasoner);
    }
}
