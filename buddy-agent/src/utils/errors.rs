//! Custom error types for the buddy agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch engine: {0}")]
    Launch(String),

    #[error("Failed to stop engine: {0}")]
    Stop(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Another snapshot workflow is in progress: {0}")]
    Busy(String),

    #[error("Node not ready: {0}")]
    NotReady(String),

    #[error("nodetool failed: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<walkdir::Error> for AgentError {
    fn from(err: walkdir::Error) -> Self {
        AgentError::Io(err.into())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
