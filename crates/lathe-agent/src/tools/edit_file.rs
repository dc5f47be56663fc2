use super::{optional_bool, optional_string, required_string, RegisteredTool, EDIT_FILE_TOOL};
use crate::{ExecutionEnvironment, ToolError};
use lathe_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

pub fn edit_file_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: EDIT_FILE_TOOL.to_string(),
            description: "Replace an exact string occurrence in a file. The old_string must be \
                          unique in the file unless replace_all is true."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the file to edit."
                    },
                    "old_string": {
                        "type": "string",
                        "description": "Exact text to find in the file."
                    },
                    "new_string": {
                        "type": "string",
                        "description": "Replacement text."
                    },
                    "replace_all": {
                        "type": "boolean",
                        "description": "Replace all occurrences. Default: false."
                    }
                },
                "required": ["file_path", "old_string", "new_string"]
            }),
        },
        executor: Arc::new(|arguments, env| {
            Box::pin(async move {
                let file_path = required_string(&arguments, "file_path")?;
                let old_string = required_string(&arguments, "old_string")?;
                let new_string = optional_string(&arguments, "new_string")?.unwrap_or_default();
                let replace_all = optional_bool(&arguments, "replace_all")?.unwrap_or(false);

                let content = env
                    .read_file_raw(&file_path)
                    .await
                    .map_err(|_| ToolError::Execution(format!("file not found: {file_path}")))?;

                let count = content.matches(&old_string).count();
                if count == 0 {
                    return Err(ToolError::Execution(format!(
                        "old_string not found in {file_path}"
                    )));
                }
                if count > 1 && !replace_all {
                    return Err(ToolError::Execution(format!(
                        "old_string found {count} times in {file_path}. Provide more context to \
                         make it unique, or set replace_all=true"
                    )));
                }

                let updated = if replace_all {
                    content.replace(&old_string, &new_string)
                } else {
                    content.replacen(&old_string, &new_string, 1)
                };
                env.write_file(&file_path, &updated).await?;

                let replacements = if replace_all { count } else { 1 };
                Ok(format!(
                    "Successfully replaced {replacements} occurrence(s) in {file_path}"
                ))
            })
        }),
    }
}
