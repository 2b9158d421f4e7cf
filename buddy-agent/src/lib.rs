//! Buddy Agent Library
//!
//! Sidecar for a single Cassandra node: supervises the engine process and
//! ships its snapshots to an object store and back.

pub mod api;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod fs;
pub mod manifest;
pub mod nodetool;
pub mod orchestrator;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{AgentError, Result};
