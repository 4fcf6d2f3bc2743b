//! Error kinds for the orchestration engine (spec §7).
//!
//! Transient/bad-input/tool-failure paths are recovered inline by the
//! component that hits them; only `Fatal` propagates up to the registry,
//! which tears the session down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed input: {0}")]
    BadInput(String),

    #[error("tool '{name}' failed: {message}")]
    ToolFailure { name: String, message: String },

    #[error("unknown tool '{name}', available: {available:?}")]
    UnknownTool { name: String, available: Vec<String> },

    #[error("tool-call loop exceeded {limit} iterations")]
    ToolLoopCap { limit: usize },

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Whether this error should tear the whole session down (§7 Fatal) as
    /// opposed to being absorbed by the component that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}
