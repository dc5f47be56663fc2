use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Runtime configuration for a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Combined user + assistant turn budget. 0 = unbounded.
    pub max_turns: usize,
    /// Tool rounds allowed per submitted input. A round is one assistant
    /// tool-calls step followed by its execution.
    pub max_tool_rounds_per_input: usize,
    pub default_command_timeout_ms: u64,
    pub max_command_timeout_ms: u64,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Per-tool character limits overriding the built-in table.
    pub tool_char_limits: HashMap<String, usize>,
    /// Per-tool line limits overriding the built-in table.
    pub tool_line_limits: HashMap<String, usize>,
    pub enable_loop_detection: bool,
    pub loop_detection_window: usize,
    pub max_subagent_depth: usize,
    /// Appended last to every system prompt when set.
    pub user_instructions: Option<String>,
    /// Nesting depth of this session; only the subagent spawn path sets
    /// a non-zero value.
    #[serde(skip)]
    pub(crate) current_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 0,
            max_tool_rounds_per_input: 200,
            default_command_timeout_ms: 10_000,
            max_command_timeout_ms: 600_000,
            reasoning_effort: None,
            tool_char_limits: HashMap::new(),
            tool_line_limits: HashMap::new(),
            enable_loop_detection: true,
            loop_detection_window: 10,
            max_subagent_depth: 1,
            user_instructions: None,
            current_depth: 0,
        }
    }
}

impl SessionConfig {
    pub fn current_depth(&self) -> usize {
        self.current_depth
    }
}
