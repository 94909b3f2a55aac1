//! OpenAI-compatible chat completions client
//!
//! Streams `POST {api_base}/chat/completions` with `stream: true` and turns
//! the server-sent events into [`StreamFragment`]s. Tool-call deltas are
//! passed through as-is; reassembly belongs to the orchestrator.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    ChatMessage, CompletionClient, CompletionRequest, CompletionStream, MessageRole,
    StreamFragment,
};
use crate::config::CompletionConfig;
use crate::{Error, Result};

/// Client for any OpenAI-compatible endpoint
pub struct OpenAiClient {
    /// API base URL
    api_base: String,
    /// HTTP client carrying the auth header
    client: reqwest::Client,
}

/// Chat message wire format
#[derive(Debug, Serialize)]
struct WireMessage {
    role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

/// Tool definition for the API
#[derive(Debug, Serialize)]
struct ToolDefinition {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: FunctionDefinition,
}

#[derive(Debug, Serialize)]
struct FunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

/// Streaming response chunk
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl From<ChatMessage> for WireMessage {
    fn from(message: ChatMessage) -> Self {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(
                message
                    .tool_calls
                    .into_iter()
                    .map(|call| WireToolCall {
                        id: call.id,
                        call_type: "function",
                        function: WireFunctionCall {
                            name: call.name,
                            arguments: call.arguments,
                        },
                    })
                    .collect(),
            )
        };

        Self {
            role: message.role,
            content: message.content,
            tool_calls,
            tool_call_id: message.tool_call_id,
        }
    }
}

/// Parsed content of one SSE line
#[derive(Debug, PartialEq)]
enum SseEvent {
    Fragments(Vec<StreamFragment>),
    Done,
    Skip,
}

impl OpenAiClient {
    /// Create a client from configuration; the key may come from `OPENAI_API_KEY`
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| Error::Config("Completion API key not configured".to_string()))?;

        // Build HTTP client with default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn build_request(request: CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request.model,
            messages: request.messages.into_iter().map(WireMessage::from).collect(),
            tools: request
                .tools
                .into_iter()
                .map(|d| ToolDefinition {
                    tool_type: "function",
                    function: FunctionDefinition {
                        name: d.name,
                        description: d.description,
                        parameters: d.parameters,
                    },
                })
                .collect(),
            stream: true,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

/// Parse SSE stream data
fn parse_sse_line(line: &str) -> Result<SseEvent> {
    let line = line.trim();

    // Skip empty lines, comments and non-data fields
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| Error::Transport(format!("Malformed stream chunk: {}", e)))?;

    let mut fragments = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                fragments.push(StreamFragment::Content(content));
            }
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            fragments.push(StreamFragment::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
        if let Some(reason) = choice.finish_reason {
            fragments.push(StreamFragment::Finished {
                reason: Some(reason),
            });
        }
    }

    Ok(SseEvent::Fragments(fragments))
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = Self::build_request(request);
        info!(model = %body.model, messages = body.messages.len(), tools = body.tools.len(), "Submitting completion");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("API error {}: {}", status, text)));
        }

        let stream = try_stream! {
            let mut bytes = response.bytes_stream();
            // Raw bytes: a multi-byte character may straddle two chunks
            let mut buffer: Vec<u8> = Vec::new();
            let mut finished = false;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| Error::Transport(format!("Stream error: {}", e)))?;
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);

                    match parse_sse_line(&line)? {
                        SseEvent::Skip => {}
                        SseEvent::Done => {
                            if !finished {
                                yield StreamFragment::Finished { reason: None };
                            }
                            return;
                        }
                        SseEvent::Fragments(fragments) => {
                            for fragment in fragments {
                                if matches!(fragment, StreamFragment::Finished { .. }) {
                                    finished = true;
                                }
                                yield fragment;
                            }
                        }
                    }
                }
            }

            debug!("Completion stream closed without [DONE]");
            if finished {
                return;
            }
            Err(Error::Transport("Stream ended without a terminal signal".to_string()))?;
        };

        Ok(Box::pin(stream))
    }
}
