use super::{ProviderCapabilities, ProviderProfile};
use crate::tools::{register_core_tools, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

/// Claude-family profile: `edit_file` is the primary editing tool and
/// commands get the long 120s default timeout.
pub struct AnthropicProfile {
    model: String,
    registry: Arc<ToolRegistry>,
}

impl AnthropicProfile {
    pub fn new(model: impl Into<String>) -> Self {
        let registry = ToolRegistry::new();
        register_core_tools(&registry, 120_000, 600_000);
        Self {
            model: model.into(),
            registry: Arc::new(registry),
        }
    }
}

impl ProviderProfile for AnthropicProfile {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_reasoning: true,
            supports_streaming: true,
            supports_parallel_tool_calls: true,
            context_window_size: 200_000,
        }
    }

    fn tool_registry(&self) -> Arc<ToolRegistry> {
        self.registry.clone()
    }

    fn base_prompt(&self) -> &str {
        ANTHROPIC_BASE_PROMPT
    }

    fn provider_options(&self) -> Option<Value> {
        Some(json!({
            "anthropic": {
                "beta_headers": ["extended-thinking-2025-04-11"]
            }
        }))
    }

    fn project_instruction_file(&self) -> Option<&str> {
        Some("CLAUDE.md")
    }

    fn default_command_timeout_ms(&self) -> u64 {
        120_000
    }
}

const ANTHROPIC_BASE_PROMPT: &str = "\
You are an autonomous coding agent. You help users with software engineering tasks by reading files, editing code, running commands, and iterating until the task is done.

# Core Principles

- Read files before editing them. Understand existing code before suggesting modifications.
- Prefer editing existing files over creating new ones.
- Use the edit_file tool for modifications. The old_string parameter must be an exact match of text in the file and must be unique. If old_string appears multiple times, provide more surrounding context to make it unique.
- Keep changes minimal and focused. Only make changes that are directly requested or clearly necessary.
- After making changes, verify them by reading the modified file or running relevant tests.
- When running shell commands, prefer short-running commands. Use timeouts for potentially long-running operations.

# Tool Usage Guidelines

- Use read_file to examine file contents before editing.
- Use edit_file for targeted modifications with old_string/new_string replacements.
- Use write_file only for creating entirely new files.
- Use shell for running commands, tests, and build operations.
- Use grep to search file contents by pattern.
- Use glob to find files by name pattern.

# Error Handling

- If a tool call fails, analyze the error and try a different approach.
- If edit_file fails because old_string is not found, re-read the file to get the current content.
- If edit_file fails because old_string is not unique, provide more context lines.
- If a command fails, inspect the output and fix the issue.

# Best Practices

- Write clean, idiomatic code that follows the project's existing style.
- Do not introduce security vulnerabilities.
- Do not add unnecessary dependencies.
- Test changes when possible.";
