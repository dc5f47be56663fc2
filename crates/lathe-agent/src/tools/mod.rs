mod apply_patch;
mod edit_file;
mod file_ops;
mod registry;
mod search;
mod shell;

use crate::ToolError;
use serde_json::Value;

pub use registry::{RegisteredTool, ToolExecutor, ToolFuture, ToolRegistry};

pub const READ_FILE_TOOL: &str = "read_file";
pub const WRITE_FILE_TOOL: &str = "write_file";
pub const EDIT_FILE_TOOL: &str = "edit_file";
pub const SHELL_TOOL: &str = "shell";
pub const GREP_TOOL: &str = "grep";
pub const GLOB_TOOL: &str = "glob";
pub const APPLY_PATCH_TOOL: &str = "apply_patch";
pub const SPAWN_AGENT_TOOL: &str = "spawn_agent";
pub const SEND_INPUT_TOOL: &str = "send_input";
pub const WAIT_TOOL: &str = "wait";
pub const CLOSE_AGENT_TOOL: &str = "close_agent";

pub use apply_patch::apply_patch_tool;
pub use edit_file::edit_file_tool;
pub use file_ops::{read_file_tool, write_file_tool};
pub use search::{glob_tool, grep_tool};
pub use shell::shell_tool;

/// Register the shared core toolset. The timeout pair parameterizes the
/// shell tool's clamp and comes from the profile's convention.
pub fn register_core_tools(registry: &ToolRegistry, default_timeout_ms: u64, max_timeout_ms: u64) {
    registry.register(read_file_tool());
    registry.register(write_file_tool());
    registry.register(edit_file_tool());
    registry.register(shell_tool(default_timeout_ms, max_timeout_ms));
    registry.register(grep_tool());
    registry.register(glob_tool());
}

pub(crate) fn required_string(arguments: &Value, key: &str) -> Result<String, ToolError> {
    match optional_string(arguments, key)? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ToolError::Validation(format!("{key} is required"))),
    }
}

pub(crate) fn optional_string(arguments: &Value, key: &str) -> Result<Option<String>, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_str()
        .map(|value| Some(value.to_string()))
        .ok_or_else(|| ToolError::Validation(format!("argument '{key}' must be a string")))
}

pub(crate) fn optional_u64(arguments: &Value, key: &str) -> Result<Option<u64>, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_u64()
        .map(Some)
        .ok_or_else(|| ToolError::Validation(format!("argument '{key}' must be a positive integer")))
}

pub(crate) fn optional_usize(arguments: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    Ok(optional_u64(arguments, key)?.map(|value| value as usize))
}

pub(crate) fn optional_bool(arguments: &Value, key: &str) -> Result<Option<bool>, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_bool()
        .map(Some)
        .ok_or_else(|| ToolError::Validation(format!("argument '{key}' must be a boolean")))
}
