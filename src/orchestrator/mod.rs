//! Streaming turn orchestration
//!
//! One turn runs through:
//!
//! ```text
//! Composing → Streaming → (ToolPending → ToolExecuting)* → Finalizing → Done
//! ```
//!
//! Content fragments are forwarded to the caller as they arrive. Tool-call
//! fragments are reassembled per call index and parsed once the completion
//! signals it is finished. Calls run concurrently; their results are fed back
//! for another completion until the model answers without tools or the round
//! cap is hit. Only a turn that reaches `Finalizing` is persisted.

mod assembler;

pub use assembler::{AssembledCall, ToolCallAssembler};

use futures::future::join_all;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::completion::{
    ChatMessage, CompletionClient, CompletionRequest, StreamFragment, ToolCallRequest,
};
use crate::config::{CompletionConfig, OrchestratorConfig};
use crate::memory::{
    AgentMemoryStore, AgentStatus, ConversationTurn, ToolExchange, TurnContent, TurnRole,
};
use crate::roles::RoleDescriptor;
use crate::tools::{CapabilityRegistry, DispatchOutcome};
use crate::workspace::WorkspaceStore;
use crate::{Error, ErrorKind, Result};

/// Buffered events between the turn task and a slow caller
const EVENT_BUFFER: usize = 64;

/// Progress of a turn as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Response text, in production order
    Content { text: String },
    /// A tool call is about to be dispatched
    ToolStart {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// A tool call succeeded
    ToolResult {
        call_id: String,
        name: String,
        outcome: DispatchOutcome,
    },
    /// A tool call failed; the turn continues
    ToolError {
        call_id: String,
        name: String,
        outcome: DispatchOutcome,
    },
    /// The turn was aborted; nothing was persisted
    Error { kind: ErrorKind, message: String },
    /// The turn completed and was persisted
    Done { outcome: TurnOutcome },
}

/// Result of a completed turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// All response text of the turn
    pub response: String,
    /// Tool exchanges in execution order
    pub tool_calls: Vec<ToolExchange>,
    /// Tool round trips taken
    pub rounds: usize,
}

/// What one role brings to a turn
#[derive(Debug, Clone)]
pub struct TurnSpec {
    /// Persona with placeholders already rendered
    pub persona: String,
    /// Module or capability names the role may call (empty = all)
    pub allowed: Vec<String>,
    pub model: String,
}

impl TurnSpec {
    pub fn for_role(role: &RoleDescriptor, workspace: &WorkspaceStore, default_model: &str) -> Self {
        Self {
            persona: role.render_persona(workspace),
            allowed: role.tools.clone(),
            model: role.model.clone().unwrap_or_else(|| default_model.to_string()),
        }
    }
}

/// Where turn events go
#[derive(Clone)]
struct EventSink(Option<mpsc::Sender<TurnEvent>>);

impl EventSink {
    /// Returns false once the caller has gone away
    async fn emit(&self, event: TurnEvent) -> bool {
        match &self.0 {
            Some(tx) => tx.send(event).await.is_ok(),
            None => true,
        }
    }

    fn is_closed(&self) -> bool {
        self.0.as_ref().is_some_and(|tx| tx.is_closed())
    }
}

/// Why a turn did not reach `Finalizing`
enum Interrupted {
    Abandoned,
    Aborted(Error),
}

impl From<Error> for Interrupted {
    fn from(error: Error) -> Self {
        Interrupted::Aborted(error)
    }
}

/// Runs turns for any role against one capability registry
pub struct StreamingOrchestrator {
    client: Arc<dyn CompletionClient>,
    registry: Arc<CapabilityRegistry>,
    completion: CompletionConfig,
    config: OrchestratorConfig,
}

impl StreamingOrchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: Arc<CapabilityRegistry>,
        completion: CompletionConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            registry,
            completion,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Run a turn to completion and return its outcome
    pub async fn invoke(
        &self,
        memory: &mut AgentMemoryStore,
        spec: &TurnSpec,
        message: &str,
    ) -> Result<TurnOutcome> {
        self.run_turn(memory, spec, message, EventSink(None)).await?
            .ok_or_else(|| Error::ToolExecution("Turn abandoned".to_string()))
    }

    /// Run a turn on a spawned task, yielding events as they happen
    ///
    /// The memory guard is held until the turn ends, so turns for one agent
    /// never overlap. Dropping the returned stream abandons the turn: calls
    /// already dispatched finish, but nothing is persisted.
    pub fn invoke_streaming(
        self: Arc<Self>,
        mut memory: OwnedMutexGuard<AgentMemoryStore>,
        spec: TurnSpec,
        message: String,
    ) -> BoxStream<'static, TurnEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let sink = EventSink(Some(tx));
            match self.run_turn(&mut memory, &spec, &message, sink).await {
                Ok(Some(_)) => {}
                Ok(None) => info!(role = memory.role(), "Streaming turn abandoned by caller"),
                Err(e) => debug!(role = memory.role(), "Streaming turn ended with error: {}", e),
            }
        });

        ReceiverStream::new(rx).boxed()
    }

    /// `Ok(None)` when the caller abandoned the turn
    async fn run_turn(
        &self,
        memory: &mut AgentMemoryStore,
        spec: &TurnSpec,
        message: &str,
        sink: EventSink,
    ) -> Result<Option<TurnOutcome>> {
        info!(
            project = memory.project_id(),
            role = memory.role(),
            model = %spec.model,
            "Starting turn"
        );

        match self.drive(memory, spec, message, &sink).await {
            Ok(outcome) => {
                if sink.is_closed() {
                    return Ok(None);
                }
                if let Err(e) = self.finalize(memory, message, &outcome).await {
                    return Err(self.abort(memory, &sink, e).await);
                }
                sink.emit(TurnEvent::Done {
                    outcome: outcome.clone(),
                })
                .await;
                info!(
                    role = memory.role(),
                    rounds = outcome.rounds,
                    tool_calls = outcome.tool_calls.len(),
                    "Turn complete"
                );
                Ok(Some(outcome))
            }
            Err(Interrupted::Abandoned) => Ok(None),
            Err(Interrupted::Aborted(e)) => Err(self.abort(memory, &sink, e).await),
        }
    }

    /// Composing, Streaming and the tool loop
    async fn drive(
        &self,
        memory: &AgentMemoryStore,
        spec: &TurnSpec,
        message: &str,
        sink: &EventSink,
    ) -> std::result::Result<TurnOutcome, Interrupted> {
        let mut messages = self.compose(memory, spec, message);
        let tools = self.registry.list_permitted(&spec.allowed);

        let mut response = String::new();
        let mut exchanges = Vec::new();
        let mut rounds = 0;

        loop {
            let request = CompletionRequest {
                model: spec.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                temperature: self.completion.temperature,
                max_tokens: self.completion.max_tokens,
            };

            let (content, calls) = self.stream_completion(request, sink).await?;
            response.push_str(&content);

            if calls.is_empty() {
                return Ok(TurnOutcome {
                    response,
                    tool_calls: exchanges,
                    rounds,
                });
            }

            if rounds >= self.config.max_tool_rounds {
                return Err(Error::ToolLoopExceeded(self.config.max_tool_rounds).into());
            }
            rounds += 1;

            let requests: Vec<ToolCallRequest> = calls.iter().map(|c| c.request.clone()).collect();
            let content = (!content.is_empty()).then_some(content);
            messages.push(ChatMessage::assistant_tool_calls(content, requests));

            for exchange in self.execute_calls(calls, &spec.allowed, sink).await? {
                messages.push(ChatMessage::tool_result(
                    &exchange.call_id,
                    exchange.outcome.to_content(),
                ));
                exchanges.push(exchange);
            }
        }
    }

    /// Persona, truncated history and the new message
    fn compose(&self, memory: &AgentMemoryStore, spec: &TurnSpec, message: &str) -> Vec<ChatMessage> {
        let mut system = spec.persona.clone();
        let context = &memory.record().context;
        if !context.is_null() {
            let rendered = serde_json::to_string_pretty(context).unwrap_or_default();
            system.push_str("\n\nProject context:\n");
            system.push_str(&rendered);
        }

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(history_messages(
            memory.recent_turns(self.config.history_window),
        ));
        messages.push(ChatMessage::user(message));
        messages
    }

    /// Forward content as it arrives; collect tool calls until the stream finishes
    async fn stream_completion(
        &self,
        request: CompletionRequest,
        sink: &EventSink,
    ) -> std::result::Result<(String, Vec<AssembledCall>), Interrupted> {
        debug!(
            client = self.client.name(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Submitting completion"
        );
        let mut stream = self.client.stream(request).await?;

        let mut content = String::new();
        let mut assembler = ToolCallAssembler::new();

        while let Some(fragment) = stream.next().await {
            match fragment? {
                StreamFragment::Content(text) => {
                    content.push_str(&text);
                    if !sink.emit(TurnEvent::Content { text }).await {
                        return Err(Interrupted::Abandoned);
                    }
                }
                StreamFragment::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => assembler.push(index, id.as_deref(), name.as_deref(), arguments.as_deref()),
                StreamFragment::Finished { reason } => {
                    debug!(reason = ?reason, "Completion finished");
                    return Ok((content, assembler.finish()));
                }
            }
        }

        Err(Error::Transport("Completion stream ended without a terminal signal".to_string()).into())
    }

    /// ToolPending and ToolExecuting for one round
    async fn execute_calls(
        &self,
        calls: Vec<AssembledCall>,
        allowed: &[String],
        sink: &EventSink,
    ) -> std::result::Result<Vec<ToolExchange>, Interrupted> {
        for call in &calls {
            let arguments = match &call.arguments {
                Ok(value) => value.clone(),
                Err(_) => Value::String(call.request.arguments.clone()),
            };
            let started = sink
                .emit(TurnEvent::ToolStart {
                    call_id: call.request.id.clone(),
                    name: call.request.name.clone(),
                    arguments,
                })
                .await;
            if !started {
                return Err(Interrupted::Abandoned);
            }
        }

        let outcomes = join_all(calls.iter().map(|call| self.execute(call, allowed))).await;

        let mut exchanges = Vec::with_capacity(calls.len());
        for (call, outcome) in calls.into_iter().zip(outcomes) {
            let event = if outcome.success {
                TurnEvent::ToolResult {
                    call_id: call.request.id.clone(),
                    name: call.request.name.clone(),
                    outcome: outcome.clone(),
                }
            } else {
                TurnEvent::ToolError {
                    call_id: call.request.id.clone(),
                    name: call.request.name.clone(),
                    outcome: outcome.clone(),
                }
            };
            if !sink.emit(event).await {
                return Err(Interrupted::Abandoned);
            }

            exchanges.push(ToolExchange {
                call_id: call.request.id,
                capability: call.request.name,
                arguments: call.arguments.unwrap_or(Value::String(call.request.arguments)),
                outcome,
            });
        }

        Ok(exchanges)
    }

    async fn execute(&self, call: &AssembledCall, allowed: &[String]) -> DispatchOutcome {
        let name = call.request.name.as_str();
        match &call.arguments {
            Err(msg) => {
                let e = Error::InvalidArguments(format!("{}: {}", name, msg));
                warn!(capability = name, "Rejected tool call: {}", e);
                DispatchOutcome::failed(&e, 0)
            }
            Ok(_) if !self.registry.permits(name, allowed) => {
                let e = Error::UnknownCapability(name.to_string());
                warn!(capability = name, "Capability not available to role");
                DispatchOutcome::failed(&e, 0)
            }
            Ok(arguments) => self.registry.dispatch(name, arguments.clone()).await,
        }
    }

    /// Persist the whole exchange with one atomic write, then mark active
    async fn finalize(
        &self,
        memory: &mut AgentMemoryStore,
        message: &str,
        outcome: &TurnOutcome,
    ) -> Result<()> {
        let mut turns = Vec::with_capacity(outcome.tool_calls.len() + 2);
        turns.push(ConversationTurn::user(message));
        turns.extend(outcome.tool_calls.iter().cloned().map(ConversationTurn::tool));
        turns.push(ConversationTurn::agent(outcome.response.clone()));

        memory.append_all(turns).await?;
        memory.set_status(AgentStatus::Active).await
    }

    /// Mark the agent errored and tell the caller
    async fn abort(&self, memory: &mut AgentMemoryStore, sink: &EventSink, e: Error) -> Error {
        error!(
            project = memory.project_id(),
            role = memory.role(),
            kind = %e.kind(),
            "Turn aborted: {}",
            e
        );
        if let Err(status_err) = memory.set_status(AgentStatus::Error).await {
            warn!("Failed to record error status: {}", status_err);
        }
        sink.emit(TurnEvent::Error {
            kind: e.kind(),
            message: e.to_string(),
        })
        .await;
        e
    }
}

/// Rebuild chat messages from persisted turns
///
/// Consecutive tool turns become one assistant message carrying the calls,
/// followed by a tool result per call.
fn history_messages(turns: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut pending: Vec<&ToolExchange> = Vec::new();

    fn flush(messages: &mut Vec<ChatMessage>, pending: &mut Vec<&ToolExchange>) {
        if pending.is_empty() {
            return;
        }
        let calls = pending
            .iter()
            .map(|x| ToolCallRequest {
                id: x.call_id.clone(),
                name: x.capability.clone(),
                arguments: match &x.arguments {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                },
            })
            .collect();
        messages.push(ChatMessage::assistant_tool_calls(None, calls));
        for x in pending.drain(..) {
            messages.push(ChatMessage::tool_result(&x.call_id, x.outcome.to_content()));
        }
    }

    for turn in turns {
        match (&turn.role, &turn.content) {
            (_, TurnContent::Tool(exchange)) => pending.push(exchange),
            (TurnRole::User, TurnContent::Text(text)) => {
                flush(&mut messages, &mut pending);
                messages.push(ChatMessage::user(text.clone()));
            }
            (_, TurnContent::Text(text)) => {
                flush(&mut messages, &mut pending);
                messages.push(ChatMessage::assistant(text.clone()));
            }
        }
    }
    flush(&mut messages, &mut pending);

    messages
}
