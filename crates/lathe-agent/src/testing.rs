//! Test doubles for driving the loop without a live provider: scripted
//! and closure-backed completers, plus a fully static profile.

use crate::{ProviderCapabilities, ProviderProfile, ToolRegistry};
use async_trait::async_trait;
use lathe_llm::{
    Completer, CompletionError, ContentPart, FinishReason, Message, Request, Response, Role,
    ToolCall, Usage,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Assistant response carrying only text.
pub fn text_response(id: impl Into<String>, text: impl Into<String>) -> Response {
    Response {
        id: id.into(),
        message: Message::assistant(text.into()),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            ..Usage::default()
        },
        finish_reason: FinishReason::Stop,
    }
}

/// Assistant response requesting tool calls (with optional text).
pub fn tool_call_response(
    id: impl Into<String>,
    text: impl Into<String>,
    calls: Vec<ToolCall>,
) -> Response {
    let text = text.into();
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ContentPart::Text { text });
    }
    content.extend(calls.into_iter().map(ContentPart::ToolCall));
    Response {
        id: id.into(),
        message: Message {
            role: Role::Assistant,
            content,
            tool_call_id: None,
        },
        usage: Usage::default(),
        finish_reason: FinishReason::ToolCalls,
    }
}

/// Pops scripted outcomes in order; running dry is an error so a test
/// that under-scripts fails loudly.
#[derive(Default)]
pub struct StaticCompleter {
    script: Mutex<VecDeque<Result<Response, CompletionError>>>,
    requests: Mutex<Vec<Request>>,
}

impl StaticCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(responses: impl IntoIterator<Item = Response>) -> Self {
        let completer = Self::new();
        for response in responses {
            completer.push_response(response);
        }
        completer
    }

    pub fn push_response(&self, response: Response) {
        self.script
            .lock()
            .expect("script poisoned")
            .push_back(Ok(response));
    }

    pub fn push_error(&self, error: CompletionError) {
        self.script
            .lock()
            .expect("script poisoned")
            .push_back(Err(error));
    }

    /// Every request the loop issued, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests poisoned").clone()
    }
}

#[async_trait]
impl Completer for StaticCompleter {
    async fn complete(&self, request: Request) -> Result<Response, CompletionError> {
        self.requests
            .lock()
            .expect("requests poisoned")
            .push(request);
        self.script
            .lock()
            .expect("script poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(CompletionError::Other(
                    "no scripted response left".to_string(),
                ))
            })
    }
}

type CompleteFn = dyn Fn(&Request) -> Result<Response, CompletionError> + Send + Sync;

/// Closure-backed completer for flows where the right response depends
/// on the request (e.g. concurrent parent and child sessions sharing one
/// completer).
pub struct FnCompleter {
    handler: Arc<CompleteFn>,
    requests: Mutex<Vec<Request>>,
}

impl FnCompleter {
    pub fn new(
        handler: impl Fn(&Request) -> Result<Response, CompletionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests poisoned").clone()
    }
}

#[async_trait]
impl Completer for FnCompleter {
    async fn complete(&self, request: Request) -> Result<Response, CompletionError> {
        let outcome = (self.handler)(&request);
        self.requests
            .lock()
            .expect("requests poisoned")
            .push(request);
        outcome
    }
}

/// Never completes; for exercising cancellation of an in-flight call.
pub struct PendingCompleter;

#[async_trait]
impl Completer for PendingCompleter {
    async fn complete(&self, _request: Request) -> Result<Response, CompletionError> {
        std::future::pending().await
    }
}

/// A profile with every knob fixed at construction.
pub struct StaticProfile {
    pub id: String,
    pub model: String,
    pub base_prompt: String,
    pub registry: Arc<ToolRegistry>,
    pub capabilities: ProviderCapabilities,
    pub instruction_file: Option<String>,
}

impl StaticProfile {
    pub fn minimal(registry: ToolRegistry) -> Self {
        Self {
            id: "static".to_string(),
            model: "static-model".to_string(),
            base_prompt: "You are a test agent.".to_string(),
            registry: Arc::new(registry),
            capabilities: ProviderCapabilities::default(),
            instruction_file: None,
        }
    }
}

impl ProviderProfile for StaticProfile {
    fn id(&self) -> &str {
        &self.id
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn tool_registry(&self) -> Arc<ToolRegistry> {
        self.registry.clone()
    }

    fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    fn project_instruction_file(&self) -> Option<&str> {
        self.instruction_file.as_deref()
    }
}
