//! Arena-backed reasoning tree.
//!
//! Nodes are stored in insertion order and linked by index. A node can only be
//! attached to a parent that already exists and sits exactly one level
//! shallower, so the tree is acyclic by construction and every tactical or
//! operational node has exactly one parent. Strategic roots and the single
//! reflective node are unparented.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::payload::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    Strategic,
    Tactical,
    Operational,
    Reflective,
}

impl ReasoningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningLevel::Strategic => "strategic",
            ReasoningLevel::Tactical => "tactical",
            ReasoningLevel::Operational => "operational",
            ReasoningLevel::Reflective => "reflective",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReasoningLevel::Strategic => "STRATEGIC",
            ReasoningLevel::Tactical => "TACTICAL",
            ReasoningLevel::Operational => "OPERATIONAL",
            ReasoningLevel::Reflective => "REFLECTIVE",
        }
    }

    /// Level a parent must have, or `None` for unparented levels.
    pub fn parent_level(&self) -> Option<ReasoningLevel> {
        match self {
            ReasoningLevel::Strategic | ReasoningLevel::Reflective => None,
            ReasoningLevel::Tactical => Some(ReasoningLevel::Strategic),
            ReasoningLevel::Operational => Some(ReasoningLevel::Tactical),
        }
    }
}

impl fmt::Display for ReasoningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a node in its [`ReasoningTree`]. Displays as `node_N` (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0 + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningNode {
    pub id: NodeId,
    pub level: ReasoningLevel,
    pub thought: String,
    pub confidence: f64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub selected: bool,
    pub evaluation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    UnknownParent(NodeId),
    MissingParent(ReasoningLevel),
    UnexpectedParent(ReasoningLevel),
    LevelMismatch {
        parent: ReasoningLevel,
        child: ReasoningLevel,
    },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::UnknownParent(id) => write!(f, "parent {id} does not exist"),
            LinkError::MissingParent(level) => write!(f, "{level} node requires a parent"),
            LinkError::UnexpectedParent(level) => write!(f, "{level} node cannot have a parent"),
            LinkError::LevelMismatch { parent, child } => {
                write!(f, "{child} node cannot be a child of a {parent} node")
            }
        }
    }
}

impl std::error::Error for LinkError {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTree {
    nodes: Vec<ReasoningNode>,
}

impl ReasoningTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        level: ReasoningLevel,
        thought: impl Into<String>,
        confidence: f64,
        parent: Option<NodeId>,
    ) -> Result<NodeId, LinkError> {
        match (level.parent_level(), parent) {
            (None, Some(_)) => return Err(LinkError::UnexpectedParent(level)),
            (Some(_), None) => return Err(LinkError::MissingParent(level)),
            (Some(expected), Some(parent_id)) => {
                let parent_node = self
                    .nodes
                    .get(parent_id.0)
                    .ok_or(LinkError::UnknownParent(parent_id))?;
                if parent_node.level != expected {
                    return Err(LinkError::LevelMismatch {
                        parent: parent_node.level,
                        child: level,
                    });
                }
            }
            (None, None) => {}
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(ReasoningNode {
            id,
            level,
            thought: thought.into(),
            confidence: confidence.clamp(0.0, 1.0),
            parent,
            children: Vec::new(),
            selected: false,
            evaluation: String::new(),
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&ReasoningNode> {
        self.nodes.get(id.0)
    }

    /// Mark `id` as selected. Unknown ids are ignored.
    pub fn select(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.selected = true;
        }
    }

    pub fn set_evaluation(&mut self, id: NodeId, evaluation: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.evaluation = evaluation.into();
        }
    }

    pub fn nodes(&self) -> &[ReasoningNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn at_level(&self, level: ReasoningLevel) -> impl Iterator<Item = &ReasoningNode> {
        self.nodes.iter().filter(move |node| node.level == level)
    }

    pub fn roots(&self) -> impl Iterator<Item = &ReasoningNode> {
        self.at_level(ReasoningLevel::Strategic)
    }

    /// Highest-confidence node among `candidates`; the earliest wins ties.
    pub fn select_best(&self, candidates: &[NodeId]) -> Option<NodeId> {
        let mut best: Option<&ReasoningNode> = None;
        for node in candidates.iter().filter_map(|id| self.get(*id)) {
            match best {
                Some(current) if node.confidence <= current.confidence => {}
                _ => best = Some(node),
            }
        }
        best.map(|node| node.id)
    }

    pub fn selected_path(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.selected)
            .map(|node| node.id)
            .collect()
    }
}

/// Advice attached to the reflective node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Proceed,
    Revise,
    Restart,
}

impl Recommendation {
    /// Lenient parse; models often echo `proceed/revise/restart` or add prose.
    /// Anything unrecognized means `Proceed`.
    pub fn parse(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        if lower.starts_with("restart") {
            Recommendation::Restart
        } else if lower.starts_with("revise") {
            Recommendation::Revise
        } else {
            Recommendation::Proceed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Proceed => "proceed",
            Recommendation::Revise => "revise",
            Recommendation::Restart => "restart",
        }
    }
}

/// Result of one hierarchical reasoning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub problem: String,
    pub tree: ReasoningTree,
    pub final_answer: String,
    pub reasoning_path: Vec<String>,
    pub total_nodes: usize,
    pub selected_path: Vec<NodeId>,
}

impl ReasoningTrace {
    pub fn reflective(&self) -> Option<&ReasoningNode> {
        self.tree.at_level(ReasoningLevel::Reflective).next()
    }

    pub fn recommendation(&self) -> Recommendation {
        self.reflective()
            .map(|node| Recommendation::parse(&node.evaluation))
            .unwrap_or(Recommendation::Proceed)
    }
}

/// Render the final answer from operational and reflective nodes.
pub fn synthesize_answer(tree: &ReasoningTree) -> String {
    let mut answer = String::from("## Solution\n");

    for node in tree.at_level(ReasoningLevel::Operational) {
        answer.push('\n');
        let payload = Payload::parse(&node.thought);
        match payload.get("implementation") {
            Some(implementation) if implementation.is_object() => {
                let description = implementation
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Implementation");
                answer.push_str(&format!("### {description}\n"));
                if let Some(outline) = implementation.get("code_outline").and_then(|v| v.as_str())
                    && !outline.trim().is_empty()
                {
                    answer.push_str(&format!("```\n{}\n```\n", outline.trim_end()));
                }
            }
            _ => {
                answer.push_str(node.thought.trim_end());
                answer.push('\n');
            }
        }
    }

    if let Some(reflective) = tree.at_level(ReasoningLevel::Reflective).next() {
        answer.push_str("\n## Notes\n");
        match Payload::parse(&reflective.thought) {
            Payload::Structured(map) => {
                let evaluation = map.get("evaluation");
                for (key, label) in [("strengths", "Strength"), ("weaknesses", "Weakness")] {
                    let items = evaluation
                        .and_then(|e| e.get(key))
                        .and_then(|v| v.as_array())
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    for item in items {
                        let text = item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string());
                        answer.push_str(&format!("- {label}: {text}\n"));
                    }
                }
            }
            Payload::Raw(text) => {
                answer.push_str(text.trim_end());
                answer.push('\n');
            }
        }
    }

    answer
}
