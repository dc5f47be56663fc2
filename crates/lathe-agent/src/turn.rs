use lathe_llm::{ContentPart, Message, ToolCall, ToolResult, Usage};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix seconds, stringly typed so turns serialize without a clock type.
pub type Timestamp = String;

pub fn current_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserTurn {
    pub content: String,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning: Option<String>,
    pub usage: Usage,
    pub response_id: Option<String>,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultsTurn {
    pub results: Vec<ToolResult>,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemTurn {
    pub content: String,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SteeringTurn {
    pub content: String,
    pub timestamp: Timestamp,
}

/// One entry in session history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User(UserTurn),
    Assistant(AssistantTurn),
    ToolResults(ToolResultsTurn),
    System(SystemTurn),
    Steering(SteeringTurn),
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(UserTurn {
            content: content.into(),
            timestamp: current_timestamp(),
        })
    }

    pub fn assistant(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        reasoning: Option<String>,
        usage: Usage,
        response_id: Option<String>,
    ) -> Self {
        Self::Assistant(AssistantTurn {
            content: content.into(),
            tool_calls,
            reasoning,
            usage,
            response_id,
            timestamp: current_timestamp(),
        })
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::ToolResults(ToolResultsTurn {
            results,
            timestamp: current_timestamp(),
        })
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::System(SystemTurn {
            content: content.into(),
            timestamp: current_timestamp(),
        })
    }

    pub fn steering(content: impl Into<String>) -> Self {
        Self::Steering(SteeringTurn {
            content: content.into(),
            timestamp: current_timestamp(),
        })
    }

    /// Text content of the turn regardless of its kind. Tool results have
    /// no single text body and yield an empty string.
    pub fn text_content(&self) -> &str {
        match self {
            Turn::User(turn) => &turn.content,
            Turn::Assistant(turn) => &turn.content,
            Turn::System(turn) => &turn.content,
            Turn::Steering(turn) => &turn.content,
            Turn::ToolResults(_) => "",
        }
    }
}

/// Serialize history into provider-neutral messages.
///
/// Steering turns become user messages so the model treats them as
/// additional instructions; each tool result becomes its own tool-role
/// message tied back to the originating call.
pub fn history_to_messages(history: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len());
    for turn in history {
        match turn {
            Turn::User(turn) => messages.push(Message::user(turn.content.clone())),
            Turn::Assistant(turn) => {
                let mut message = Message::assistant(turn.content.clone());
                for call in &turn.tool_calls {
                    message.content.push(ContentPart::ToolCall(call.clone()));
                }
                messages.push(message);
            }
            Turn::ToolResults(turn) => {
                for result in &turn.results {
                    messages.push(Message::tool_result(
                        result.tool_call_id.clone(),
                        result.content.clone(),
                        result.is_error,
                    ));
                }
            }
            Turn::System(turn) => messages.push(Message::system(turn.content.clone())),
            Turn::Steering(turn) => messages.push(Message::user(turn.content.clone())),
        }
    }
    messages
}
