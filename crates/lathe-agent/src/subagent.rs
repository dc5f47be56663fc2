//! Depth-bounded child sessions and the tools that drive them.
//!
//! The manager is scoped to a single parent session: it hands out ids,
//! runs each child's `submit` on a background task, and resolves results
//! when the model calls `wait`. The subagent tool definitions live here;
//! their execution is intercepted by the owning session because spawning
//! needs access to the session's profile, completer, and configuration.

use crate::session::SessionHandle;
use crate::tools::{
    RegisteredTool, ToolRegistry, CLOSE_AGENT_TOOL, SEND_INPUT_TOOL, SPAWN_AGENT_TOOL, WAIT_TOOL,
};
use crate::{Session, ToolError, Turn};
use lathe_llm::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Turn budget applied to a child unless spawn_agent overrides it.
pub const SUBAGENT_DEFAULT_MAX_TURNS: usize = 50;

pub fn is_subagent_tool(name: &str) -> bool {
    matches!(
        name,
        SPAWN_AGENT_TOOL | SEND_INPUT_TOOL | WAIT_TOOL | CLOSE_AGENT_TOOL
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
}

impl SubAgentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub output: String,
    pub success: bool,
    pub turns_used: usize,
}

struct SubAgentEntry {
    handle: SessionHandle,
    task: Option<JoinHandle<SubAgentResult>>,
    status: SubAgentStatus,
    result: Option<SubAgentResult>,
}

/// Child-session bookkeeping for one parent.
pub struct SubAgentManager {
    agents: HashMap<String, SubAgentEntry>,
    max_depth: usize,
    depth: usize,
}

impl SubAgentManager {
    pub fn new(max_depth: usize, depth: usize) -> Self {
        Self {
            agents: HashMap::new(),
            max_depth,
            depth,
        }
    }

    /// Whether another nesting level is allowed below this session.
    pub fn can_spawn(&self) -> bool {
        self.depth < self.max_depth
    }

    /// Launch `child.submit(task)` on a background task and return the
    /// new subagent id. The parent does not block on the child.
    pub fn spawn(&mut self, mut child: Session, task: String) -> Result<String, ToolError> {
        if !self.can_spawn() {
            return Err(ToolError::Execution(format!(
                "maximum subagent depth ({}) reached",
                self.max_depth
            )));
        }

        let id = Uuid::new_v4().to_string();
        let handle = child.handle();
        let worker = tokio::spawn(async move {
            let completion = child.submit(task).await;
            let turns_used = child.history().len();
            let last_output = child
                .history()
                .iter()
                .rev()
                .find_map(|turn| match turn {
                    Turn::Assistant(turn) => Some(turn.content.clone()),
                    _ => None,
                })
                .unwrap_or_default();

            match completion {
                Ok(()) => SubAgentResult {
                    output: last_output,
                    success: true,
                    turns_used,
                },
                Err(error) => SubAgentResult {
                    output: format!("Error: {error}"),
                    success: false,
                    turns_used,
                },
            }
        });

        self.agents.insert(
            id.clone(),
            SubAgentEntry {
                handle,
                task: Some(worker),
                status: SubAgentStatus::Running,
                result: None,
            },
        );
        Ok(id)
    }

    pub fn status(&self, id: &str) -> Option<SubAgentStatus> {
        self.agents.get(id).map(|entry| entry.status)
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    /// Queue a steering message on the child.
    pub fn steer(&self, id: &str, message: String) -> Result<(), ToolError> {
        let entry = self.agents.get(id).ok_or_else(|| not_found(id))?;
        entry.handle.steer(message);
        Ok(())
    }

    /// Block until the child's worker finishes and return its terminal
    /// status and result. Idempotent after completion.
    pub async fn wait(&mut self, id: &str) -> Result<(SubAgentStatus, SubAgentResult), ToolError> {
        let entry = self.agents.get_mut(id).ok_or_else(|| not_found(id))?;
        if let Some(task) = entry.task.take() {
            match task.await {
                Ok(result) => {
                    entry.status = if result.success {
                        SubAgentStatus::Completed
                    } else {
                        SubAgentStatus::Failed
                    };
                    entry.result = Some(result);
                }
                Err(error) => {
                    entry.status = SubAgentStatus::Failed;
                    entry.result = Some(SubAgentResult {
                        output: format!("subagent task failed: {error}"),
                        success: false,
                        turns_used: 0,
                    });
                }
            }
        }
        Ok((entry.status, entry.result.clone().unwrap_or_default()))
    }

    /// Cancel the child. A still-running child is marked failed; its
    /// worker unwinds at the next cancellation point.
    pub fn close(&mut self, id: &str) -> Result<(), ToolError> {
        let entry = self.agents.get_mut(id).ok_or_else(|| not_found(id))?;
        entry.handle.cancel();
        if entry.status == SubAgentStatus::Running {
            entry.status = SubAgentStatus::Failed;
        }
        Ok(())
    }

    /// Cancel every child. Invoked from `Session::close`.
    pub fn close_all(&mut self) {
        for entry in self.agents.values_mut() {
            entry.handle.cancel();
            if entry.status == SubAgentStatus::Running {
                entry.status = SubAgentStatus::Failed;
            }
        }
    }
}

fn not_found(id: &str) -> ToolError {
    ToolError::Execution(format!("subagent {id} not found"))
}

/// Registry of the four subagent tools. Their executors are placeholders:
/// the session intercepts these names before registry dispatch.
pub fn subagent_tool_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(session_dispatched(ToolDefinition {
        name: SPAWN_AGENT_TOOL.to_string(),
        description: "Spawn a subagent to handle a scoped task autonomously.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Natural language task description."
                },
                "working_dir": {
                    "type": "string",
                    "description": "Subdirectory to scope the agent to."
                },
                "max_turns": {
                    "type": "integer",
                    "description": "Turn limit for the subagent. Default: 50."
                }
            },
            "required": ["task"]
        }),
    }));
    registry.register(session_dispatched(ToolDefinition {
        name: SEND_INPUT_TOOL.to_string(),
        description: "Send a message to a running subagent.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "The subagent ID."
                },
                "message": {
                    "type": "string",
                    "description": "Message to send."
                }
            },
            "required": ["agent_id", "message"]
        }),
    }));
    registry.register(session_dispatched(ToolDefinition {
        name: WAIT_TOOL.to_string(),
        description: "Wait for a subagent to complete and return its result.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "The subagent ID."
                }
            },
            "required": ["agent_id"]
        }),
    }));
    registry.register(session_dispatched(ToolDefinition {
        name: CLOSE_AGENT_TOOL.to_string(),
        description: "Terminate a subagent.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "The subagent ID."
                }
            },
            "required": ["agent_id"]
        }),
    }));
    registry
}

fn session_dispatched(definition: ToolDefinition) -> RegisteredTool {
    let name = definition.name.clone();
    RegisteredTool {
        definition,
        executor: Arc::new(move |_arguments, _env| {
            let name = name.clone();
            Box::pin(async move {
                Err(ToolError::Execution(format!(
                    "{name} is dispatched by its owning session"
                )))
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_gates_spawning() {
        let at_root = SubAgentManager::new(1, 0);
        assert!(at_root.can_spawn());

        let at_limit = SubAgentManager::new(1, 1);
        assert!(!at_limit.can_spawn());

        let deeper = SubAgentManager::new(3, 2);
        assert!(deeper.can_spawn());
    }

    #[test]
    fn tool_registry_exposes_all_four_tools() {
        let registry = subagent_tool_registry();
        assert_eq!(
            registry.names(),
            vec![
                CLOSE_AGENT_TOOL,
                SEND_INPUT_TOOL,
                SPAWN_AGENT_TOOL,
                WAIT_TOOL
            ]
        );
    }

    #[test]
    fn subagent_tool_names_are_recognized() {
        for name in [SPAWN_AGENT_TOOL, SEND_INPUT_TOOL, WAIT_TOOL, CLOSE_AGENT_TOOL] {
            assert!(is_subagent_tool(name));
        }
        assert!(!is_subagent_tool("shell"));
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let mut manager = SubAgentManager::new(1, 0);
        assert!(manager.steer("missing", "hi".into()).is_err());
        assert!(manager.wait("missing").await.is_err());
        assert!(manager.close("missing").is_err());
        assert_eq!(manager.status("missing"), None);
    }
}
