//! Completion service boundary
//!
//! The orchestrator talks to a language model only through
//! [`CompletionClient`]: submit the composed messages plus the capability
//! surface, get back an incremental stream of [`StreamFragment`]s that ends
//! with [`StreamFragment::Finished`].
//!
//! Implementations:
//! - [`OpenAiClient`]: OpenAI-compatible chat completions over SSE
//! - [`ScriptedClient`]: replays scripted fragment sequences, for tests and demos

mod openai;
mod scripted;

pub use openai::OpenAiClient;
pub use scripted::{ScriptStep, ScriptedClient};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::tools::CapabilityDescriptor;
use crate::Result;

/// Incremental completion output
pub type CompletionStream = BoxStream<'static, Result<StreamFragment>>;

/// Message author as seen by the completion service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call the model made, fully reassembled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw argument text as produced by the model
    pub arguments: String,
}

/// One entry of the composed conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    /// Assistant message that requested tool calls
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// Tool result correlated to a call id
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Everything one completion submission carries
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Capabilities the model may call
    pub tools: Vec<CapabilityDescriptor>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One incremental piece of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    /// Response text, in production order
    Content(String),
    /// Part of a tool call; `id`, `name` and `arguments` may each be split
    /// across fragments sharing the same `index`
    ToolCall {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// Terminal signal for the submission
    Finished { reason: Option<String> },
}

/// A streaming language-model completion service
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Client name for logs
    fn name(&self) -> &str;

    /// Submit a request; failures to reach the service are `Error::Transport`
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream>;
}
