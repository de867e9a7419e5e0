//! Subsystems built on `core`.
//!
//! - `todo`: the task board (human tasks, agent tasks, todos, prompt notes)
//! - `discovery`: tool indexing and ranking
//! - `knowledge`: knowledge collections and usage counters

pub mod discovery;
pub mod knowledge;
pub mod todo;
