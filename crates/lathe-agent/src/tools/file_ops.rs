use super::{optional_usize, required_string, RegisteredTool, READ_FILE_TOOL, WRITE_FILE_TOOL};
use crate::ExecutionEnvironment;
use lathe_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

pub fn read_file_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: READ_FILE_TOOL.to_string(),
            description: "Read a file from the filesystem. Returns line-numbered content."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path to the file to read."
                    },
                    "offset": {
                        "type": "integer",
                        "description": "1-based line number to start reading from."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of lines to read. Default: 2000."
                    }
                },
                "required": ["file_path"]
            }),
        },
        executor: Arc::new(|arguments, env| {
            Box::pin(async move {
                let file_path = required_string(&arguments, "file_path")?;
                let offset = optional_usize(&arguments, "offset")?.unwrap_or(0);
                let limit = optional_usize(&arguments, "limit")?.unwrap_or(0);
                env.read_file(&file_path, offset, limit)
                    .await
                    .map_err(Into::into)
            })
        }),
    }
}

pub fn write_file_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: WRITE_FILE_TOOL.to_string(),
            description:
                "Write content to a file. Creates the file and parent directories if needed."
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path to write to."
                    },
                    "content": {
                        "type": "string",
                        "description": "The full file content to write."
                    }
                },
                "required": ["file_path", "content"]
            }),
        },
        executor: Arc::new(|arguments, env| {
            Box::pin(async move {
                let file_path = required_string(&arguments, "file_path")?;
                let content = arguments
                    .get("content")
                    .and_then(|value| value.as_str())
                    .ok_or_else(|| {
                        crate::ToolError::Validation("content is required".to_string())
                    })?;
                env.write_file(&file_path, content).await?;
                Ok(format!(
                    "Successfully wrote {} bytes to {}",
                    content.len(),
                    file_path
                ))
            })
        }),
    }
}
