//! Side-effecting adapters: configuration, model and shell processes, prompt
//! rendering, the knowledge store, the workspace file system, and run logs.

pub mod config;
pub mod knowledge;
pub mod model;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod terminal;
pub mod workspace;
