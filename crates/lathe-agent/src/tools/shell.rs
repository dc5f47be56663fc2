use super::{optional_u64, required_string, RegisteredTool, SHELL_TOOL};
use crate::ExecutionEnvironment;
use lathe_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

/// Build the shell tool. The clamp range is fixed at registration time
/// from the profile's command-timeout convention.
pub fn shell_tool(default_timeout_ms: u64, max_timeout_ms: u64) -> RegisteredTool {
    let max_timeout_ms = max_timeout_ms.max(default_timeout_ms);
    RegisteredTool {
        definition: ToolDefinition {
            name: SHELL_TOOL.to_string(),
            description: "Execute a shell command. Returns stdout, stderr, and exit code."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The command to run."
                    },
                    "timeout_ms": {
                        "type": "integer",
                        "description": "Override the default command timeout in milliseconds."
                    },
                    "description": {
                        "type": "string",
                        "description": "Human-readable description of what this command does."
                    }
                },
                "required": ["command"]
            }),
        },
        executor: Arc::new(move |arguments, env| {
            Box::pin(async move {
                let command = required_string(&arguments, "command")?;
                let timeout_ms = optional_u64(&arguments, "timeout_ms")?
                    .filter(|requested| *requested > 0)
                    .unwrap_or(default_timeout_ms)
                    .min(max_timeout_ms);

                let result = env.exec_command(&command, timeout_ms, None, None).await?;

                let mut output = result.combined_output();
                if result.timed_out {
                    output.push_str(&format!(
                        "\n\n[ERROR: Command timed out after {timeout_ms}ms. Partial output is shown above.\nYou can retry with a longer timeout by setting the timeout_ms parameter.]"
                    ));
                } else if result.exit_code != 0 {
                    output.push_str(&format!("\n\n[Exit code: {}]", result.exit_code));
                }
                Ok(output)
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

    fn local_env() -> (tempfile::TempDir, Arc<dyn ExecutionEnvironment>) {
        let dir = tempdir().expect("tempdir");
        let env: Arc<dyn ExecutionEnvironment> =
            Arc::new(LocalExecutionEnvironment::new(dir.path()));
        (dir, env)
    }

    #[tokio::test]
    async fn successful_command_returns_plain_output() {
        let (_dir, env) = local_env();
        let tool = shell_tool(10_000, 600_000);
        let output = (tool.executor)(json!({"command": "echo hello"}), env)
            .await
            .expect("execute");
        assert_eq!(output.trim(), "hello");
        assert!(!output.contains("[Exit code:"));
    }

    #[tokio::test]
    async fn nonzero_exit_appends_the_exit_code() {
        let (_dir, env) = local_env();
        let tool = shell_tool(10_000, 600_000);
        let output = (tool.executor)(json!({"command": "echo partial; exit 7"}), env)
            .await
            .expect("execute");
        assert!(output.contains("partial"));
        assert!(output.ends_with("[Exit code: 7]"));
    }

    #[tokio::test]
    async fn timeout_appends_the_error_paragraph() {
        let (_dir, env) = local_env();
        let tool = shell_tool(10_000, 600_000);
        let output = (tool.executor)(
            json!({"command": "sleep 5", "timeout_ms": 100}),
            env,
        )
        .await
        .expect("execute");
        assert!(output.contains("[ERROR: Command timed out after 100ms."));
        assert!(!output.contains("[Exit code:"));
    }

    #[tokio::test]
    async fn requested_timeout_is_clamped_to_the_maximum() {
        let (_dir, env) = local_env();
        // Max of 150ms: the oversized request still times out quickly.
        let tool = shell_tool(100, 150);
        let output = (tool.executor)(
            json!({"command": "sleep 5", "timeout_ms": 99_000}),
            env,
        )
        .await
        .expect("execute");
        assert!(output.contains("Command timed out after 150ms"));
    }
}
