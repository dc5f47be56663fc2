use thiserror::Error;

/// Failure modes a completer can surface to the loop.
///
/// The variants mirror the usual provider taxonomy so callers can decide
/// between retrying, surfacing, and shutting down without inspecting
/// provider-specific payloads.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("context length exceeded: {0}")]
    ContextLength(String),
    #[error("content filtered: {0}")]
    ContentFilter(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("request aborted: {0}")]
    Aborted(String),
    #[error("{0}")]
    Other(String),
}

impl CompletionError {
    /// Whether a fresh attempt at the same request could plausibly succeed.
    ///
    /// Rate limits, server hiccups, network faults, and timeouts are
    /// transient; everything else is a caller or account problem.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Server(_) | Self::Network(_) | Self::Timeout(_)
        )
    }
}
