//! End-to-end conformance: full sessions driven by scripted completers
//! against a real local execution environment.

use lathe_agent::testing::{text_response, tool_call_response, FnCompleter, StaticCompleter};
use lathe_agent::{
    AnthropicProfile, CapturingEmitter, ExecutionEnvironment, LocalExecutionEnvironment, Session,
    SessionConfig, SessionState, Turn,
};
use lathe_llm::{Completer, ContentPart, Role, ToolCall};
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn session_with(
    completer: Arc<dyn Completer>,
    dir: &std::path::Path,
) -> (Session, Arc<CapturingEmitter>) {
    let emitter = Arc::new(CapturingEmitter::default());
    let profile = Arc::new(AnthropicProfile::new("claude-test"));
    let env = Arc::new(LocalExecutionEnvironment::new(dir));
    let session = Session::with_emitter(
        profile,
        env,
        completer,
        SessionConfig::default(),
        emitter.clone(),
    );
    (session, emitter)
}

fn tool_outputs_of(request: &lathe_llm::Request) -> Vec<String> {
    request
        .messages
        .iter()
        .filter(|message| message.role == Role::Tool)
        .flat_map(|message| {
            message.content.iter().filter_map(|part| match part {
                ContentPart::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
        })
        .collect()
}

#[tokio::test]
async fn multi_round_session_maintains_call_result_pairing() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "setting up",
            vec![ToolCall::new(
                "c1",
                "write_file",
                json!({"file_path": "src/lib.rs", "content": "pub fn answer() -> u32 { 42 }"}),
            )],
        ),
        tool_call_response(
            "r2",
            "",
            vec![
                ToolCall::new("c2", "glob", json!({"pattern": "**/*.rs"})),
                ToolCall::new("c3", "grep", json!({"pattern": "answer"})),
            ],
        ),
        tool_call_response(
            "r3",
            "",
            vec![ToolCall::new(
                "c4",
                "read_file",
                json!({"file_path": "src/lib.rs"}),
            )],
        ),
        text_response("r4", "everything checks out"),
    ]));

    let (mut session, _emitter) = session_with(completer, dir.path());
    session.submit("build and inspect").await.expect("submit");

    assert_eq!(session.state(), SessionState::Idle);

    // Every assistant turn with calls is immediately followed by a
    // results turn with matching ids in matching order.
    let history = session.history();
    for window in history.windows(2) {
        if let Turn::Assistant(assistant) = &window[0] {
            if assistant.tool_calls.is_empty() {
                continue;
            }
            let Turn::ToolResults(results) = &window[1] else {
                panic!("tool calls must be followed by their results");
            };
            assert_eq!(results.results.len(), assistant.tool_calls.len());
            for (call, result) in assistant.tool_calls.iter().zip(&results.results) {
                assert_eq!(call.id, result.tool_call_id);
            }
        }
    }

    // Natural completion: last turn is an assistant turn without calls.
    assert!(matches!(
        history.last(),
        Some(Turn::Assistant(turn)) if turn.tool_calls.is_empty()
    ));

    let glob_result = history.iter().find_map(|turn| match turn {
        Turn::ToolResults(results) => results
            .results
            .iter()
            .find(|result| result.tool_call_id == "c2"),
        _ => None,
    });
    assert!(glob_result
        .expect("glob result")
        .content
        .contains("src/lib.rs"));
}

#[tokio::test]
async fn subagent_scoped_to_a_working_directory_writes_inside_it() {
    let dir = tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("scope")).expect("mkdir");

    let completer = Arc::new(FnCompleter::new(|request| {
        let user_texts: Vec<String> = request
            .messages
            .iter()
            .filter(|message| message.role == Role::User)
            .map(|message| message.text_content())
            .collect();
        let tool_outputs = tool_outputs_of(request);

        // Child conversation.
        if user_texts.iter().any(|text| text == "create marker.txt") {
            if tool_outputs
                .iter()
                .any(|output| output.starts_with("Successfully wrote"))
            {
                return Ok(text_response("child-2", "marker written"));
            }
            return Ok(tool_call_response(
                "child-1",
                "",
                vec![ToolCall::new(
                    "cc1",
                    "write_file",
                    json!({"file_path": "marker.txt", "content": "here"}),
                )],
            ));
        }

        // Parent conversation.
        if tool_outputs.is_empty() {
            return Ok(tool_call_response(
                "parent-1",
                "",
                vec![ToolCall::new(
                    "pc1",
                    "spawn_agent",
                    json!({"task": "create marker.txt", "working_dir": "scope"}),
                )],
            ));
        }
        if let Some(spawned) = tool_outputs
            .iter()
            .find(|output| output.starts_with("Subagent spawned with ID: "))
        {
            if !tool_outputs.iter().any(|output| output.starts_with("Status: ")) {
                let agent_id = spawned
                    .trim_start_matches("Subagent spawned with ID: ")
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                return Ok(tool_call_response(
                    "parent-2",
                    "",
                    vec![ToolCall::new("pc2", "wait", json!({"agent_id": agent_id}))],
                ));
            }
        }
        Ok(text_response("parent-3", "delegated and done"))
    }));

    let (mut session, _emitter) = session_with(completer, dir.path());
    session.submit("delegate into scope/").await.expect("submit");

    // The child resolved its relative path against the scoped root.
    let marker = dir.path().join("scope").join("marker.txt");
    assert_eq!(
        std::fs::read_to_string(marker).expect("marker exists"),
        "here"
    );
    assert!(!dir.path().join("marker.txt").exists());
}

#[tokio::test]
async fn closing_a_running_subagent_marks_it_failed() {
    let dir = tempdir().expect("tempdir");

    let completer = Arc::new(FnCompleter::new(|request| {
        let user_texts: Vec<String> = request
            .messages
            .iter()
            .filter(|message| message.role == Role::User)
            .map(|message| message.text_content())
            .collect();
        let tool_outputs = tool_outputs_of(request);

        // Child: never stops calling tools on its own.
        if user_texts.iter().any(|text| text == "spin forever") {
            return Ok(tool_call_response(
                "child-spin",
                "",
                vec![ToolCall::new(
                    "cc",
                    "shell",
                    json!({"command": "sleep 0.01"}),
                )],
            ));
        }

        // Parent: spawn, close, wait, finish.
        if tool_outputs.is_empty() {
            return Ok(tool_call_response(
                "parent-1",
                "",
                vec![ToolCall::new(
                    "pc1",
                    "spawn_agent",
                    json!({"task": "spin forever"}),
                )],
            ));
        }
        let agent_id = tool_outputs
            .iter()
            .find(|output| output.starts_with("Subagent spawned with ID: "))
            .map(|spawned| {
                spawned
                    .trim_start_matches("Subagent spawned with ID: ")
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });
        let Some(agent_id) = agent_id else {
            return Ok(text_response("parent-x", "nothing to manage"));
        };

        let closed = tool_outputs
            .iter()
            .any(|output| output.contains("terminated"));
        if !closed {
            return Ok(tool_call_response(
                "parent-2",
                "",
                vec![ToolCall::new(
                    "pc2",
                    "close_agent",
                    json!({"agent_id": agent_id}),
                )],
            ));
        }
        let waited = tool_outputs.iter().any(|output| output.starts_with("Status: "));
        if !waited {
            return Ok(tool_call_response(
                "parent-3",
                "",
                vec![ToolCall::new("pc3", "wait", json!({"agent_id": agent_id}))],
            ));
        }
        Ok(text_response("parent-4", "cleaned up"))
    }));

    let (mut session, _emitter) = session_with(completer, dir.path());
    session.submit("manage a runaway child").await.expect("submit");

    let wait_output = session
        .history()
        .iter()
        .find_map(|turn| match turn {
            Turn::ToolResults(results) => results
                .results
                .iter()
                .find(|result| result.content.starts_with("Status: ")),
            _ => None,
        })
        .expect("wait result");
    assert!(wait_output.content.starts_with("Status: failed"));
}

#[tokio::test]
async fn edit_round_trip_through_the_loop() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new(
                "c1",
                "edit_file",
                json!({
                    "file_path": "config.toml",
                    "old_string": "debug = false",
                    "new_string": "debug = true"
                }),
            )],
        ),
        text_response("r2", "flipped the flag"),
    ]));

    let (mut session, _emitter) = session_with(completer, dir.path());
    let env: Arc<dyn ExecutionEnvironment> = session.execution_env();
    env.write_file("config.toml", "name = \"app\"\ndebug = false\n")
        .await
        .expect("write");

    session.submit("enable debug").await.expect("submit");

    assert_eq!(
        env.read_file_raw("config.toml").await.expect("read"),
        "name = \"app\"\ndebug = true\n"
    );
    let edit_result = session
        .history()
        .iter()
        .find_map(|turn| match turn {
            Turn::ToolResults(results) => results.results.first(),
            _ => None,
        })
        .expect("edit result");
    assert_eq!(
        edit_result.content,
        "Successfully replaced 1 occurrence(s) in config.toml"
    );
}
