//! Boardroom: persistent agents sharing a project workspace
//!
//! Long-lived, model-backed agent roles (CEO, frontend, backend, ...) work
//! inside one workspace per project, call schema-checked tools, and resume
//! their conversations after a restart.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        AgentRuntime (per process)       │
//! │  initialize / invoke / invoke_streaming │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         StreamingOrchestrator           │
//! │  stream → reassemble calls → dispatch   │
//! └──────────┬───────────────────┬──────────┘
//!            ▼                   ▼
//! ┌────────────────────┐ ┌──────────────────┐
//! │ CapabilityRegistry │ │ AgentMemoryStore │
//! │ fs, git, team, gh  │ │ turns, decisions │
//! └──────────┬─────────┘ └────────┬─────────┘
//!            ▼                    ▼
//! ┌─────────────────────────────────────────┐
//! │  WorkspaceStore + CoordinationBoard     │
//! │  one root per project, no escapes       │
//! └─────────────────────────────────────────┘
//! ```

pub mod board;
pub mod completion;
pub mod config;
pub mod memory;
pub mod orchestrator;
pub mod roles;
pub mod runtime;
pub mod tools;
pub mod workspace;

// Re-exports for convenience
pub use board::{BoardMessage, CoordinationBoard, Priority, SharedNote};
pub use completion::{CompletionClient, OpenAiClient, ScriptedClient};
pub use config::Config;
pub use memory::{AgentMemoryStore, AgentRecord, AgentStatus, ConversationTurn, DecisionEntry};
pub use orchestrator::{StreamingOrchestrator, TurnEvent, TurnOutcome};
pub use roles::RoleDescriptor;
pub use runtime::AgentRuntime;
pub use tools::{Capability, CapabilityRegistry, DispatchOutcome, ParamSchema, ToolModule};
pub use workspace::WorkspaceStore;

use serde::{Deserialize, Serialize};

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Workspace security violation: {0}")]
    WorkspaceSecurity(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Capability '{name}' already registered by module '{owner}'")]
    DuplicateCapability { name: String, owner: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Tool loop exceeded {0} round trips")]
    ToolLoopExceeded(usize),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Corrupt persisted state: {0}")]
    CorruptState(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Classify this error for structured tool results and turn events
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WorkspaceSecurity(_) => ErrorKind::WorkspaceSecurity,
            Error::UnknownCapability(_) => ErrorKind::UnknownCapability,
            Error::DuplicateCapability { .. } => ErrorKind::DuplicateCapability,
            Error::InvalidArguments(_) => ErrorKind::InvalidArguments,
            Error::ToolLoopExceeded(_) => ErrorKind::ToolLoopExceeded,
            Error::Transport(_) | Error::Http(_) => ErrorKind::Transport,
            Error::CorruptState(_) => ErrorKind::CorruptState,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ToolExecution(_)
            | Error::Config(_)
            | Error::NotFound(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Toml(_) => ErrorKind::ToolExecution,
        }
    }
}

/// Wire-level error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "WorkspaceSecurityError")]
    WorkspaceSecurity,
    #[serde(rename = "UnknownCapabilityError")]
    UnknownCapability,
    #[serde(rename = "DuplicateCapabilityError")]
    DuplicateCapability,
    #[serde(rename = "InvalidArgumentsError")]
    InvalidArguments,
    #[serde(rename = "ToolExecutionError")]
    ToolExecution,
    #[serde(rename = "ToolLoopExceeded")]
    ToolLoopExceeded,
    #[serde(rename = "TransportError")]
    Transport,
    #[serde(rename = "CorruptStateError")]
    CorruptState,
    #[serde(rename = "TimeoutError")]
    Timeout,
}

impl ErrorKind {
    /// Name used in structured results
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::WorkspaceSecurity => "WorkspaceSecurityError",
            ErrorKind::UnknownCapability => "UnknownCapabilityError",
            ErrorKind::DuplicateCapability => "DuplicateCapabilityError",
            ErrorKind::InvalidArguments => "InvalidArgumentsError",
            ErrorKind::ToolExecution => "ToolExecutionError",
            ErrorKind::ToolLoopExceeded => "ToolLoopExceeded",
            ErrorKind::Transport => "TransportError",
            ErrorKind::CorruptState => "CorruptStateError",
            ErrorKind::Timeout => "TimeoutError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
