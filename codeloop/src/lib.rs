//! Multi-agent code refinement.
//!
//! A planner, a coder and a reviewer (each a [`io::model::LanguageModel`]
//! behind an [`agents::Agent`]) drive a bounded Plan -> Code -> Review -> Fix
//! loop until the reviewer approves or the iteration budget runs out. The
//! crate is layered:
//!
//! - **[`core`]**: pure, deterministic logic. Approval classification, file
//!   block extraction, payload parsing, the reasoning arena, answer voting
//!   and conversation history. No I/O.
//! - **[`io`]**: side-effecting adapters. Configuration, model and shell
//!   processes, prompt rendering, the knowledge store, the workspace and run
//!   logs.
//! - **[`agents`]**: role-bound agents that own their conversation memory.
//!
//! The orchestration modules ([`orchestrator`], [`reasoner`], [`agentic`])
//! combine these into the CLI commands.

pub mod agentic;
pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod reasoner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
