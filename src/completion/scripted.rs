//! Scripted completion client
//!
//! Replays one [`ScriptStep`] per submission and records every request it
//! receives. Drives the orchestrator without a network, in tests and in
//! offline demos.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CompletionClient, CompletionRequest, CompletionStream, StreamFragment};
use crate::{Error, Result};

/// What the client does for one submission
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Stream these fragments in order
    Fragments(Vec<StreamFragment>),
    /// Fail the submission itself
    SubmitError(String),
    /// Stream these fragments, then fail mid-stream
    StreamError(Vec<StreamFragment>, String),
}

/// A [`CompletionClient`] that replays a script
#[derive(Clone, Default)]
pub struct ScriptedClient {
    steps: Arc<Mutex<VecDeque<ScriptStep>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    fragment_delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arbitrary step
    pub fn then(self, step: ScriptStep) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
        self
    }

    /// Reply with plain text, streamed as one fragment per word
    pub fn then_text(self, text: &str) -> Self {
        let mut fragments: Vec<StreamFragment> = text
            .split_inclusive(' ')
            .map(|word| StreamFragment::Content(word.to_string()))
            .collect();
        fragments.push(StreamFragment::Finished {
            reason: Some("stop".to_string()),
        });
        self.then(ScriptStep::Fragments(fragments))
    }

    /// Reply with complete tool calls `(id, name, arguments)`, one fragment each
    pub fn then_tool_calls(self, calls: &[(&str, &str, &str)]) -> Self {
        let mut fragments: Vec<StreamFragment> = calls
            .iter()
            .enumerate()
            .map(|(index, (id, name, arguments))| StreamFragment::ToolCall {
                index: index as u32,
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments: Some(arguments.to_string()),
            })
            .collect();
        fragments.push(StreamFragment::Finished {
            reason: Some("tool_calls".to_string()),
        });
        self.then(ScriptStep::Fragments(fragments))
    }

    /// Sleep before each fragment
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Requests received so far, in submission order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Steps not yet consumed
    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let step = self
            .steps
            .lock()
            .ok()
            .and_then(|mut steps| steps.pop_front())
            .ok_or_else(|| Error::Transport("Script exhausted".to_string()))?;

        let (fragments, failure) = match step {
            ScriptStep::SubmitError(message) => return Err(Error::Transport(message)),
            ScriptStep::Fragments(fragments) => (fragments, None),
            ScriptStep::StreamError(fragments, message) => (fragments, Some(message)),
        };

        let mut items: Vec<Result<StreamFragment>> = fragments.into_iter().map(Ok).collect();
        if let Some(message) = failure {
            items.push(Err(Error::Transport(message)));
        }

        let delay = self.fragment_delay;
        let stream = stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });

        Ok(stream.boxed())
    }
}
