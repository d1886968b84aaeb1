//! Mock implementations of core traits for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

use crate::{
    events::ProgressEvent,
    traits::{ChatMessage, ConfirmationGate, LlmClient, LlmResponse, LlmUsage, ProgressSink, Tool},
    types::{ConfirmationRequest, ToolOutput},
    Error, Result,
};

// =============================================================================
// Mock LLM Client
// =============================================================================

/// Scripted mock LLM that returns predefined responses.
///
/// Responses are replayed in order; the last one repeats once the script
/// runs out.
pub struct MockLlm {
    responses: Vec<String>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlm {
    /// Create a new mock LLM with a queue of responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Get the number of calls made to this mock.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Messages received by each call.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_response(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| Error::internal("mock llm lock poisoned"))?;
        calls.push(messages.to_vec());
        let idx = (calls.len() - 1).min(self.responses.len().saturating_sub(1));
        let content = self
            .responses
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::internal("mock llm has no responses"))?;

        Ok(LlmResponse {
            content,
            finish_reason: "stop".to_string(),
            usage: LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            },
        })
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        self.next_response(messages)
    }
}

// =============================================================================
// Mock Tools
// =============================================================================

/// Mock tool that records calls and returns a fixed value.
pub struct RecordingTool {
    name: String,
    description: String,
    response: Value,
    delay: Option<Duration>,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub fn new(name: &str, response: Value) -> Self {
        Self {
            name: name.to_string(),
            description: format!("records calls to {}", name),
            response,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(args);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ToolOutput::text(self.response.to_string()).with_data(self.response.clone()))
    }
}

/// Mock tool that always fails.
pub struct FailingTool {
    name: String,
    message: String,
    calls: Mutex<usize>,
}

impl FailingTool {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        Ok(ToolOutput::error(self.message.clone()))
    }
}

// =============================================================================
// Mock Sinks and Gates
// =============================================================================

/// Progress sink that keeps every event.
#[derive(Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events for one id, in arrival order.
    pub fn events_for(&self, id: &str) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.id == id)
            .collect()
    }
}

#[async_trait]
impl ProgressSink for CollectingProgressSink {
    async fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Gate with a fixed answer that records every request.
pub struct ScriptedGate {
    answer: bool,
    requests: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedGate {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ConfirmationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfirmationGate for ScriptedGate {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        Ok(self.answer)
    }
}
