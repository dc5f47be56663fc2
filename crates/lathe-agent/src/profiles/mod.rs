mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicProfile;
pub use gemini::GeminiProfile;
pub use openai::OpenAiProfile;

use crate::{prompt, ExecutionEnvironment, ToolRegistry};
use lathe_llm::ToolDefinition;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_reasoning: bool,
    pub supports_streaming: bool,
    pub supports_parallel_tool_calls: bool,
    pub context_window_size: usize,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_reasoning: true,
            supports_streaming: true,
            supports_parallel_tool_calls: false,
            context_window_size: 128_000,
        }
    }
}

/// Provider-aligned bundle: the tools a model family expects, its base
/// system prompt, capability flags, and request options.
pub trait ProviderProfile: Send + Sync {
    /// Opaque provider tag ("openai", "anthropic", "gemini", ...).
    fn id(&self) -> &str;

    fn model_id(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    fn tool_registry(&self) -> Arc<ToolRegistry>;

    /// Provider-specific base instructions, the first prompt section.
    fn base_prompt(&self) -> &str;

    /// Opaque request options forwarded through the completer.
    fn provider_options(&self) -> Option<Value> {
        None
    }

    /// Provider-specific project instruction file, loaded alongside
    /// AGENTS.md.
    fn project_instruction_file(&self) -> Option<&str> {
        None
    }

    fn default_command_timeout_ms(&self) -> u64 {
        10_000
    }

    fn max_command_timeout_ms(&self) -> u64 {
        600_000
    }

    /// Ordered prompt document: base instructions, environment block,
    /// git context, tool descriptions, project docs.
    fn build_system_prompt(
        &self,
        env: &dyn ExecutionEnvironment,
        tool_definitions: &[ToolDefinition],
        project_docs: &str,
    ) -> String {
        prompt::assemble_system_prompt(
            self.base_prompt(),
            env,
            self.model_id(),
            tool_definitions,
            project_docs,
        )
    }
}
