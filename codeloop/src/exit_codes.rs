//! Stable exit codes for codeloop CLI commands.

/// Command succeeded; for `run`, `agentic` and `classify`, the reviewer approved.
pub const OK: i32 = 0;
/// Invalid arguments, configuration or input, or any other error.
pub const INVALID: i32 = 1;
/// The run completed without reviewer approval, or the review needs changes.
pub const NEEDS_CHANGES: i32 = 2;
/// An agent call failed and aborted the run, or a write or execution failed.
pub const FAILED: i32 = 3;
