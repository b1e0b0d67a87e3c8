//! Deterministic, pure logic shared by the orchestrators.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and model text, and return deterministic outputs suitable
//! for tests.

pub mod approval;
pub mod extract;
pub mod history;
pub mod payload;
pub mod reasoning;
pub mod strategy;
pub mod types;
