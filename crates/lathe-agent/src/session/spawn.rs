use super::Session;
use crate::events::EventKind;
use crate::execution::ScopedExecutionEnvironment;
use crate::subagent::SUBAGENT_DEFAULT_MAX_TURNS;
use crate::tools::{
    optional_string, optional_usize, required_string, CLOSE_AGENT_TOOL, SEND_INPUT_TOOL,
    SPAWN_AGENT_TOOL, WAIT_TOOL,
};
use crate::truncation::truncate_tool_output;
use crate::{ExecutionEnvironment, ToolError};
use lathe_llm::{ToolCall, ToolResult};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

impl Session {
    /// Subagent tools run on the session itself: spawning needs the
    /// profile, completer, and config, and wait/close mutate the manager.
    pub(super) async fn execute_subagent_call(&mut self, call: ToolCall) -> ToolResult {
        self.emit(
            EventKind::ToolCallStart,
            json!({ "tool_name": call.name, "call_id": call.id }),
        );

        let outcome = match call.name.as_str() {
            SPAWN_AGENT_TOOL => self.handle_spawn_agent(&call.arguments),
            SEND_INPUT_TOOL => self.handle_send_input(&call.arguments),
            WAIT_TOOL => self.handle_wait(&call.arguments).await,
            CLOSE_AGENT_TOOL => self.handle_close_agent(&call.arguments),
            other => Err(ToolError::UnknownTool(other.to_string())),
        };

        match outcome {
            Ok(raw_output) => {
                let truncated = truncate_tool_output(&raw_output, &call.name, &self.config);
                self.emit(
                    EventKind::ToolCallEnd,
                    json!({ "call_id": call.id, "output": raw_output }),
                );
                ToolResult {
                    tool_call_id: call.id,
                    content: truncated,
                    is_error: false,
                }
            }
            Err(error) => {
                let message = format!("Tool error ({}): {}", call.name, error);
                self.emit(
                    EventKind::ToolCallEnd,
                    json!({ "call_id": call.id, "error": message }),
                );
                ToolResult {
                    tool_call_id: call.id,
                    content: message,
                    is_error: true,
                }
            }
        }
    }

    fn handle_spawn_agent(&mut self, arguments: &Value) -> Result<String, ToolError> {
        if !self.subagents.can_spawn() {
            return Err(ToolError::Execution(format!(
                "maximum subagent depth ({}) reached",
                self.config.max_subagent_depth
            )));
        }

        let task = required_string(arguments, "task")?;
        let working_dir = optional_string(arguments, "working_dir")?;
        let max_turns = optional_usize(arguments, "max_turns")?;

        let mut child_config = self.config.clone();
        child_config.max_turns = max_turns
            .filter(|turns| *turns > 0)
            .unwrap_or(SUBAGENT_DEFAULT_MAX_TURNS);
        child_config.current_depth = self.config.current_depth + 1;

        let child_env: Arc<dyn ExecutionEnvironment> = match working_dir {
            Some(dir) => {
                let requested = Path::new(&dir);
                let resolved = if requested.is_absolute() {
                    requested.to_path_buf()
                } else {
                    self.env.working_directory().join(requested)
                };
                if !resolved.is_dir() {
                    return Err(ToolError::Execution(format!(
                        "subagent working_dir '{dir}' does not exist or is not a directory"
                    )));
                }
                Arc::new(ScopedExecutionEnvironment::new(self.env.clone(), resolved))
            }
            None => self.env.clone(),
        };

        let child = Session::with_emitter(
            self.profile.clone(),
            child_env,
            self.completer.clone(),
            child_config,
            self.emitter.clone(),
        );
        let id = self.subagents.spawn(child, task)?;
        tracing::debug!(session_id = %self.id, subagent_id = %id, "subagent spawned");

        Ok(format!("Subagent spawned with ID: {id}\nStatus: running"))
    }

    fn handle_send_input(&mut self, arguments: &Value) -> Result<String, ToolError> {
        let agent_id = required_string(arguments, "agent_id")?;
        let message = required_string(arguments, "message")?;
        self.subagents.steer(&agent_id, message)?;
        Ok(format!("Message sent to subagent {agent_id}"))
    }

    async fn handle_wait(&mut self, arguments: &Value) -> Result<String, ToolError> {
        let agent_id = required_string(arguments, "agent_id")?;
        let (status, result) = self.subagents.wait(&agent_id).await?;
        Ok(format!(
            "Status: {}\nTurns used: {}\nOutput:\n{}",
            status.label(),
            result.turns_used,
            result.output
        ))
    }

    fn handle_close_agent(&mut self, arguments: &Value) -> Result<String, ToolError> {
        let agent_id = required_string(arguments, "agent_id")?;
        self.subagents.close(&agent_id)?;
        Ok(format!("Subagent {agent_id} terminated"))
    }
}
