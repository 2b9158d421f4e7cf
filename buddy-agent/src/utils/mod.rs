//! Error types and logging setup shared by every agent module.

pub mod errors;
pub mod logger;

pub use errors::{AgentError, Result};
