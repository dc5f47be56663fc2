use super::{required_string, RegisteredTool, APPLY_PATCH_TOOL};
use crate::patch::{apply_patch_operations, parse_patch};
use lathe_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

pub fn apply_patch_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: APPLY_PATCH_TOOL.to_string(),
            description: "Apply code changes using the v4a patch format. Supports creating, \
                          deleting, and modifying files in a single operation."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "patch": {
                        "type": "string",
                        "description": "The patch content in v4a format."
                    }
                },
                "required": ["patch"]
            }),
        },
        executor: Arc::new(|arguments, env| {
            Box::pin(async move {
                let patch = required_string(&arguments, "patch")?;
                let operations = parse_patch(&patch)?;
                apply_patch_operations(&operations, env).await
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionEnvironment, LocalExecutionEnvironment};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn applies_a_patch_and_reports_the_summary() {
        let dir = tempdir().expect("tempdir");
        let env: Arc<dyn ExecutionEnvironment> =
            Arc::new(LocalExecutionEnvironment::new(dir.path()));

        let tool = apply_patch_tool();
        let patch = "*** Begin Patch\n*** Add File: hello.txt\n+hi\n*** End Patch";
        let output = (tool.executor)(json!({ "patch": patch }), env.clone())
            .await
            .expect("execute");

        assert_eq!(output, "Created: hello.txt");
        assert_eq!(env.read_file_raw("hello.txt").await.expect("read"), "hi");
    }

    #[tokio::test]
    async fn malformed_patch_is_a_validation_error() {
        let dir = tempdir().expect("tempdir");
        let env: Arc<dyn ExecutionEnvironment> =
            Arc::new(LocalExecutionEnvironment::new(dir.path()));

        let tool = apply_patch_tool();
        let error = (tool.executor)(json!({"patch": "no framing"}), env)
            .await
            .expect_err("should fail");
        assert!(error.to_string().contains("*** Begin Patch"));
    }
}
