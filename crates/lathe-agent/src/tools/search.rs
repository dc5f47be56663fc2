use super::{
    optional_bool, optional_string, optional_usize, required_string, RegisteredTool, GLOB_TOOL,
    GREP_TOOL,
};
use crate::{ExecutionEnvironment, GrepOptions};
use lathe_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

pub fn grep_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: GREP_TOOL.to_string(),
            description: "Search file contents using regex patterns. Returns matching lines with \
                          file paths and line numbers."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Regex pattern to search for."
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory or file to search. Default: working directory."
                    },
                    "glob_filter": {
                        "type": "string",
                        "description": "File pattern filter (e.g., \"*.py\")."
                    },
                    "case_insensitive": {
                        "type": "boolean",
                        "description": "Case insensitive search. Default: false."
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results. Default: 100."
                    }
                },
                "required": ["pattern"]
            }),
        },
        executor: Arc::new(|arguments, env| {
            Box::pin(async move {
                let pattern = required_string(&arguments, "pattern")?;
                let path = optional_string(&arguments, "path")?;
                let options = GrepOptions {
                    glob_filter: optional_string(&arguments, "glob_filter")?,
                    case_insensitive: optional_bool(&arguments, "case_insensitive")?
                        .unwrap_or(false),
                    max_results: Some(
                        optional_usize(&arguments, "max_results")?
                            .filter(|max| *max > 0)
                            .unwrap_or(100),
                    ),
                };
                env.grep(&pattern, path.as_deref(), options)
                    .await
                    .map_err(Into::into)
            })
        }),
    }
}

pub fn glob_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: GLOB_TOOL.to_string(),
            description: "Find files matching a glob pattern. Returns file paths sorted by \
                          modification time (newest first)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Glob pattern (e.g., \"**/*.rs\")."
                    },
                    "path": {
                        "type": "string",
                        "description": "Base directory. Default: working directory."
                    }
                },
                "required": ["pattern"]
            }),
        },
        executor: Arc::new(|arguments, env| {
            Box::pin(async move {
                let pattern = required_string(&arguments, "pattern")?;
                let path = optional_string(&arguments, "path")?;
                let matches = env.glob(&pattern, path.as_deref()).await?;
                if matches.is_empty() {
                    return Ok("No files matched the pattern.".to_string());
                }
                Ok(matches.join("\n"))
            })
        }),
    }
}
