use super::{ProviderCapabilities, ProviderProfile};
use crate::tools::{register_core_tools, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

/// Gemini-family profile: core tools only, default safety settings in
/// the provider options.
pub struct GeminiProfile {
    model: String,
    registry: Arc<ToolRegistry>,
}

impl GeminiProfile {
    pub fn new(model: impl Into<String>) -> Self {
        let registry = ToolRegistry::new();
        register_core_tools(&registry, 10_000, 600_000);
        Self {
            model: model.into(),
            registry: Arc::new(registry),
        }
    }
}

impl ProviderProfile for GeminiProfile {
    fn id(&self) -> &str {
        "gemini"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_reasoning: true,
            supports_streaming: true,
            supports_parallel_tool_calls: true,
            context_window_size: 1_048_576,
        }
    }

    fn tool_registry(&self) -> Arc<ToolRegistry> {
        self.registry.clone()
    }

    fn base_prompt(&self) -> &str {
        GEMINI_BASE_PROMPT
    }

    fn provider_options(&self) -> Option<Value> {
        Some(json!({
            "gemini": {
                "safety_settings": "default"
            }
        }))
    }

    fn project_instruction_file(&self) -> Option<&str> {
        Some("GEMINI.md")
    }
}

const GEMINI_BASE_PROMPT: &str = "\
You are an autonomous coding agent. You help users with software engineering tasks by reading files, editing code, running commands, and iterating until the task is done.

# Core Principles

- Read files before editing them. Understand existing code before suggesting modifications.
- Use edit_file for targeted modifications with search-and-replace.
- Use write_file for creating new files.
- Keep changes minimal and focused. Only make changes that are directly requested or clearly necessary.
- After making changes, verify them by reading the modified file or running relevant tests.

# Tool Usage Guidelines

- Use read_file to examine file contents before editing.
- Use edit_file for modifications with old_string/new_string search-and-replace.
- Use write_file for creating entirely new files.
- Use shell for running commands (10s default timeout).
- Use grep to search file contents by pattern.
- Use glob to find files by name pattern.

# GEMINI.md

If the project contains a GEMINI.md file, follow the instructions in it. GEMINI.md files in subdirectories take precedence over root-level files.

# Error Handling

- If a tool call fails, analyze the error and try a different approach.
- If edit_file fails, re-read the file to get current content.
- If a command fails, inspect the output and fix the issue.

# Best Practices

- Write clean, idiomatic code that follows the project's existing style.
- Do not introduce security vulnerabilities.
- Do not add unnecessary dependencies.
- Test changes when possible.";
