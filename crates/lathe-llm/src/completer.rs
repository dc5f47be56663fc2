use crate::{CompletionError, Request, Response, ToolCall, Usage};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Incremental output from a streaming completion.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    TextDelta { delta: String },
    ReasoningDelta { delta: String },
    ToolCallComplete { call: ToolCall },
    UsageUpdate { usage: Usage },
    Finish { response: Response },
}

pub type StreamEventStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, CompletionError>> + Send>>;

/// The single seam between the agent loop and a model provider.
///
/// Implementations own request translation, transport, and their retry
/// schedule. When `complete` returns an error the loop assumes retries
/// have already been exhausted and classifies the failure with
/// [`CompletionError::is_retryable`].
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, request: Request) -> Result<Response, CompletionError>;

    /// Optional streaming variant. Providers that cannot stream keep the
    /// default, and callers fall back to `complete`.
    async fn stream(&self, request: Request) -> Result<StreamEventStream, CompletionError> {
        let _ = request;
        Err(CompletionError::Other(
            "streaming is not supported by this completer".to_string(),
        ))
    }
}
