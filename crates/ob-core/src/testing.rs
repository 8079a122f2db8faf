//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::Error;
use crate::message::{Message, ToolCall, Usage};
use crate::provider::{CompletionRequest, CompletionResponse, FinishReason, Provider};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<CompletionResponse, Error> + Send + Sync>;

/// A mock provider that returns pre-configured responses.
///
/// Queued responses are returned first (FIFO). When the queue is empty and a
/// responder is installed, the responder computes the reply from the request.
pub struct MockProvider {
    responses: Mutex<Vec<Result<CompletionResponse, Error>>>,
    responder: Option<Responder>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            responder: None,
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Build a provider whose replies are computed from each request.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse, Error> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Queue a text response to be returned by the next complete() call.
    /// Responses are returned in FIFO order (first queued = first returned).
    pub fn queue_response(&self, content: &str) {
        self.queue_raw_response(text_response(content));
    }

    /// Queue a response that requests a single tool call.
    pub fn queue_tool_call(&self, name: &str, arguments: serde_json::Value) {
        let count = self.responses.lock().unwrap().len();
        let call = ToolCall::new(format!("call-{}", count), name, arguments);
        self.queue_raw_response(tool_call_response(vec![call]));
    }

    /// Queue an error for the next complete() call.
    pub fn queue_error(&self, error: Error) {
        self.responses.lock().unwrap().insert(0, Err(error));
    }

    /// Queue a raw CompletionResponse.
    pub fn queue_raw_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().insert(0, Ok(response));
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    /// Get the last captured request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }

    /// All captured requests, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.captured_requests.lock().unwrap().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let queued = self.responses.lock().unwrap().pop();
        let result = match queued {
            Some(result) => result,
            None => match &self.responder {
                Some(responder) => responder(&request),
                None => Err(Error::Unknown("No mock response queued".to_string())),
            },
        };
        self.captured_requests.lock().unwrap().push(request);
        result
    }
}

/// A final-text completion response.
pub fn text_response(content: &str) -> CompletionResponse {
    CompletionResponse {
        message: Message::assistant(content),
        usage: Usage::new(0, 0),
        model: "mock-model".to_string(),
        finish_reason: FinishReason::Stop,
    }
}

/// A completion response requesting the given tool calls.
pub fn tool_call_response(calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse {
        message: Message::assistant_with_tool_calls("", calls),
        usage: Usage::new(0, 0),
        model: "mock-model".to_string(),
        finish_reason: FinishReason::ToolCalls,
    }
}
