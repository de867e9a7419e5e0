//! Shared primitives for taskmesh.
//!
//! Storage access, validation, embeddings, the vector index and call dispatch
//! live here. Subsystems in `plugins` build on these.

pub mod broker;
pub mod cancel;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod schemas;
pub mod store;
pub mod time;
pub mod validate;
pub mod vector;
