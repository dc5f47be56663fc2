use super::*;
use crate::testing::{
    text_response, tool_call_response, FnCompleter, PendingCompleter, StaticCompleter,
    StaticProfile,
};
use crate::{AgentError, AnthropicProfile, CapturingEmitter, LocalExecutionEnvironment, ToolRegistry};
use lathe_llm::{CompletionError, ContentPart, Role, ToolCall};
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn anthropic_session(
    completer: Arc<dyn Completer>,
    dir: &std::path::Path,
    config: SessionConfig,
) -> (Session, Arc<CapturingEmitter>) {
    let emitter = Arc::new(CapturingEmitter::default());
    let profile = Arc::new(AnthropicProfile::new("claude-test"));
    let env = Arc::new(LocalExecutionEnvironment::new(dir));
    let session = Session::with_emitter(profile, env, completer, config, emitter.clone());
    (session, emitter)
}

fn tool_results_of(history: &[Turn]) -> Vec<&crate::ToolResultsTurn> {
    history
        .iter()
        .filter_map(|turn| match turn {
            Turn::ToolResults(results) => Some(results),
            _ => None,
        })
        .collect()
}

fn assert_call_result_pairing(history: &[Turn]) {
    for window in history.windows(2) {
        if let Turn::Assistant(assistant) = &window[0] {
            if assistant.tool_calls.is_empty() {
                continue;
            }
            let Turn::ToolResults(results) = &window[1] else {
                panic!("assistant tool calls must be followed by a tool-results turn");
            };
            assert_eq!(results.results.len(), assistant.tool_calls.len());
            for (call, result) in assistant.tool_calls.iter().zip(&results.results) {
                assert_eq!(call.id, result.tool_call_id);
            }
        }
    }
}

#[tokio::test]
async fn minimal_completion_records_history_and_events() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([text_response("r1", "ok")]));
    let (mut session, emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.submit("hello").await.expect("submit");

    assert_eq!(session.state(), SessionState::Idle);
    let history = session.history();
    assert_eq!(history.len(), 2);
    assert!(matches!(&history[0], Turn::User(turn) if turn.content == "hello"));
    assert!(
        matches!(&history[1], Turn::Assistant(turn) if turn.content == "ok" && turn.tool_calls.is_empty())
    );

    let kinds = emitter.kinds();
    assert!(kinds.contains(&EventKind::UserInput));
    assert!(kinds.contains(&EventKind::SessionEnd));
    let text_end = emitter
        .last_of(EventKind::AssistantTextEnd)
        .expect("assistant_text_end");
    assert_eq!(text_end.str_field("text"), Some("ok"));
}

#[tokio::test]
async fn single_tool_round_feeds_line_numbered_content_back() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new(
                "c1",
                "read_file",
                json!({"file_path": "a.txt"}),
            )],
        ),
        text_response("r2", "done"),
    ]));
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());
    session
        .execution_env()
        .write_file("a.txt", "x\ny")
        .await
        .expect("write");

    session.submit("read it").await.expect("submit");

    let history = session.history();
    assert_eq!(history.len(), 4);
    assert_call_result_pairing(history);

    let results = tool_results_of(history);
    assert_eq!(results[0].results[0].content, "1 | x\n2 | y\n");
    assert!(!results[0].results[0].is_error);
    assert!(matches!(&history[3], Turn::Assistant(turn) if turn.content == "done"));
}

#[tokio::test]
async fn oversized_output_is_truncated_for_the_model_but_full_on_events() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new(
                "c1",
                "shell",
                json!({"command": "head -c 80000 /dev/zero | tr '\\0' x"}),
            )],
        ),
        text_response("r2", "done"),
    ]));
    let (mut session, emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.submit("make noise").await.expect("submit");

    let results = tool_results_of(session.history());
    let content = &results[0].results[0].content;
    assert!(content.contains("[WARNING: Tool output was truncated."));
    assert!(content.starts_with(&"x".repeat(100)));
    assert!(content.ends_with(&"x".repeat(100)));
    // Hard bound: the configured 30k plus the marker paragraph.
    assert!(content.chars().count() < 30_000 + 400);

    let end_event = emitter
        .snapshot()
        .into_iter()
        .find(|event| {
            event.kind == EventKind::ToolCallEnd && event.str_field("output").is_some()
        })
        .expect("tool_call_end with output");
    assert_eq!(
        end_event.str_field("output").map(|output| output.len()),
        Some(80_000)
    );
}

#[tokio::test]
async fn repeating_tool_calls_inject_loop_steering() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::new());
    for index in 0..10 {
        completer.push_response(tool_call_response(
            format!("r{index}"),
            "",
            vec![ToolCall::new(
                format!("c{index}"),
                "shell",
                json!({"command": "ls"}),
            )],
        ));
    }
    completer.push_response(text_response("r-final", "switching approach"));

    let (mut session, emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());
    session.submit("list things").await.expect("submit");

    let steering: Vec<&Turn> = session
        .history()
        .iter()
        .filter(|turn| matches!(turn, Turn::Steering(_)))
        .collect();
    assert!(!steering.is_empty());
    assert!(steering[0].text_content().starts_with("Loop detected:"));

    let event = emitter
        .last_of(EventKind::LoopDetection)
        .expect("loop_detection event");
    assert!(event
        .str_field("message")
        .is_some_and(|message| message.contains("repeating pattern")));
}

#[tokio::test]
async fn shell_timeout_reports_the_error_paragraph() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new(
                "c1",
                "shell",
                json!({"command": "sleep 5", "timeout_ms": 100}),
            )],
        ),
        text_response("r2", "done"),
    ]));
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.submit("wait for it").await.expect("submit");

    let results = tool_results_of(session.history());
    let content = &results[0].results[0].content;
    assert!(content.contains("[ERROR: Command timed out after 100ms."));
    assert!(content.ends_with("You can retry with a longer timeout by setting the timeout_ms parameter.]"));
    assert!(!results[0].results[0].is_error);
}

#[tokio::test]
async fn subagent_spawn_and_wait_round_trip() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(FnCompleter::new(|request| {
        let user_texts: Vec<String> = request
            .messages
            .iter()
            .filter(|message| message.role == Role::User)
            .map(|message| message.text_content())
            .collect();
        // The child session sees the spawn task as its first user input.
        if user_texts.iter().any(|text| text == "write hello.txt") {
            return Ok(text_response("child-1", "created hello.txt"));
        }

        let tool_outputs: Vec<String> = request
            .messages
            .iter()
            .filter(|message| message.role == Role::Tool)
            .flat_map(|message| {
                message.content.iter().filter_map(|part| match part {
                    ContentPart::ToolResult { content, .. } => Some(content.clone()),
                    _ => None,
                })
            })
            .collect();

        if tool_outputs.is_empty() {
            return Ok(tool_call_response(
                "parent-1",
                "",
                vec![ToolCall::new(
                    "c1",
                    "spawn_agent",
                    json!({"task": "write hello.txt"}),
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
                    vec![ToolCall::new("c2", "wait", json!({"agent_id": agent_id}))],
                ));
            }
        }

        Ok(text_response("parent-3", "all done"))
    }));

    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());
    session.submit("delegate the work").await.expect("submit");

    let results = tool_results_of(session.history());
    assert!(results[0].results[0]
        .content
        .starts_with("Subagent spawned with ID: "));
    assert!(results[0].results[0].content.ends_with("Status: running"));

    // Child history is [user task, assistant reply]: two turns used.
    assert_eq!(
        results[1].results[0].content,
        "Status: completed\nTurns used: 2\nOutput:\ncreated hello.txt"
    );
    assert!(matches!(
        session.history().last(),
        Some(Turn::Assistant(turn)) if turn.content == "all done"
    ));
}

#[tokio::test]
async fn depth_limit_hides_and_blocks_subagent_tools() {
    let dir = tempdir().expect("tempdir");

    // At depth 0 the spawn tools are registered.
    let completer = Arc::new(StaticCompleter::scripted([text_response("r", "ok")]));
    let (root_session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());
    assert!(root_session
        .tool_names()
        .contains(&"spawn_agent".to_string()));

    // At the depth limit they are not, and calls are refused.
    let mut config = SessionConfig::default();
    config.current_depth = 1;
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new("c1", "spawn_agent", json!({"task": "nested"}))],
        ),
        text_response("r2", "done"),
    ]));
    let (mut leaf_session, _emitter) = anthropic_session(completer, dir.path(), config);
    assert!(!leaf_session
        .tool_names()
        .contains(&"spawn_agent".to_string()));

    leaf_session.submit("try to nest").await.expect("submit");
    let results = tool_results_of(leaf_session.history());
    assert!(results[0].results[0].is_error);
    assert!(results[0].results[0]
        .content
        .contains("maximum subagent depth (1) reached"));
}

#[tokio::test]
async fn round_budget_stops_the_loop_with_a_turn_limit_event() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::new());
    for index in 0..2 {
        completer.push_response(tool_call_response(
            format!("r{index}"),
            "",
            vec![ToolCall::new(
                format!("c{index}"),
                "shell",
                json!({"command": format!("echo round {index}")}),
            )],
        ));
    }

    let mut config = SessionConfig::default();
    config.max_tool_rounds_per_input = 2;
    let (mut session, emitter) = anthropic_session(completer, dir.path(), config);

    session.submit("loop forever").await.expect("submit");

    assert_eq!(session.state(), SessionState::Idle);
    assert!(matches!(session.history().last(), Some(Turn::ToolResults(_))));
    let event = emitter.last_of(EventKind::TurnLimit).expect("turn_limit");
    assert_eq!(event.data.get("round").and_then(|v| v.as_u64()), Some(2));
}

#[tokio::test]
async fn turn_budget_counts_user_and_assistant_turns() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([tool_call_response(
        "r1",
        "",
        vec![ToolCall::new("c1", "shell", json!({"command": "echo hi"}))],
    )]));

    let mut config = SessionConfig::default();
    config.max_turns = 2;
    let (mut session, emitter) = anthropic_session(completer, dir.path(), config);

    session.submit("start").await.expect("submit");

    let event = emitter.last_of(EventKind::TurnLimit).expect("turn_limit");
    assert_eq!(
        event.data.get("total_turns").and_then(|v| v.as_u64()),
        Some(2)
    );
}

#[tokio::test]
async fn unknown_tool_becomes_an_error_result_and_the_loop_continues() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new("c1", "bogus", json!({}))],
        ),
        text_response("r2", "recovered"),
    ]));
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.submit("go").await.expect("submit");

    let results = tool_results_of(session.history());
    assert!(results[0].results[0].is_error);
    assert_eq!(results[0].results[0].content, "Unknown tool: bogus");
    assert!(matches!(
        session.history().last(),
        Some(Turn::Assistant(turn)) if turn.content == "recovered"
    ));
}

#[tokio::test]
async fn tool_execution_failure_is_wrapped_and_recovered() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new(
                "c1",
                "edit_file",
                json!({"file_path": "nope.txt", "old_string": "a", "new_string": "b"}),
            )],
        ),
        text_response("r2", "done"),
    ]));
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.submit("edit missing").await.expect("submit");

    let results = tool_results_of(session.history());
    assert!(results[0].results[0].is_error);
    assert_eq!(
        results[0].results[0].content,
        "Tool error (edit_file): file not found: nope.txt"
    );
}

#[tokio::test]
async fn steering_is_injected_after_the_user_turn_and_serialized_as_user() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([text_response("r1", "ok")]));
    let completer_probe = completer.clone();
    let (mut session, emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.steer("focus on tests");
    session.submit("hello").await.expect("submit");

    let history = session.history();
    assert!(matches!(&history[0], Turn::User(_)));
    assert!(matches!(&history[1], Turn::Steering(turn) if turn.content == "focus on tests"));
    assert!(emitter.last_of(EventKind::SteeringInjected).is_some());

    let request = &completer_probe.requests()[0];
    let user_texts: Vec<String> = request
        .messages
        .iter()
        .filter(|message| message.role == Role::User)
        .map(|message| message.text_content())
        .collect();
    assert_eq!(user_texts, vec!["hello", "focus on tests"]);
}

#[tokio::test]
async fn follow_up_runs_as_a_fresh_input_after_completion() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        text_response("r1", "first done"),
        text_response("r2", "second done"),
    ]));
    let (mut session, emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.follow_up("and then this");
    session.submit("do this").await.expect("submit");

    let user_turns: Vec<&str> = session
        .history()
        .iter()
        .filter_map(|turn| match turn {
            Turn::User(turn) => Some(turn.content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(user_turns, vec!["do this", "and then this"]);

    let session_ends = emitter
        .kinds()
        .into_iter()
        .filter(|kind| *kind == EventKind::SessionEnd)
        .count();
    assert_eq!(session_ends, 1);
}

#[tokio::test]
async fn abort_is_observed_between_rounds_without_discarding_results() {
    let dir = tempdir().expect("tempdir");
    let handle_slot: Arc<std::sync::Mutex<Option<SessionHandle>>> =
        Arc::new(std::sync::Mutex::new(None));
    let slot = handle_slot.clone();
    let completer = Arc::new(FnCompleter::new(move |_request| {
        if let Some(handle) = slot.lock().expect("slot poisoned").as_ref() {
            handle.abort();
        }
        Ok(tool_call_response(
            "r",
            "",
            vec![ToolCall::new("c1", "shell", json!({"command": "echo hi"}))],
        ))
    }));
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());
    *handle_slot.lock().expect("slot poisoned") = Some(session.handle());

    session.submit("work").await.expect("submit");

    // The in-flight round's results were recorded before the abort took
    // effect.
    assert!(matches!(session.history().last(), Some(Turn::ToolResults(_))));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn cancellation_interrupts_the_completer_and_closes_the_session() {
    let dir = tempdir().expect("tempdir");
    let (mut session, emitter) = anthropic_session(
        Arc::new(PendingCompleter),
        dir.path(),
        SessionConfig::default(),
    );
    let handle = session.handle();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.cancel();
    });

    let error = session.submit("never finishes").await.expect_err("cancel");
    assert!(matches!(error, AgentError::Cancelled));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(emitter
        .last_of(EventKind::Error)
        .and_then(|event| event.str_field("error").map(str::to_string))
        .is_some_and(|message| message.contains("cancelled")));

    let closed = session.submit("again").await.expect_err("closed");
    assert!(matches!(
        closed,
        AgentError::Session(crate::SessionError::Closed)
    ));
}

#[tokio::test]
async fn nonretryable_completion_errors_close_the_session() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::new());
    completer.push_error(CompletionError::Authentication("bad key".into()));
    let (mut session, emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    let error = session.submit("hello").await.expect_err("should fail");
    assert!(matches!(error, AgentError::Completion(_)));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(emitter.last_of(EventKind::Error).is_some());
}

#[tokio::test]
async fn retry_exhausted_errors_leave_the_session_usable() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::new());
    completer.push_error(CompletionError::RateLimited("429".into()));
    let completer_again = completer.clone();
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    let error = session.submit("hello").await.expect_err("should fail");
    assert!(matches!(error, AgentError::Completion(_)));
    assert_eq!(session.state(), SessionState::Idle);

    completer_again.push_response(text_response("r2", "recovered"));
    session.submit("try again").await.expect("second submit");
    assert!(matches!(
        session.history().last(),
        Some(Turn::Assistant(turn)) if turn.content == "recovered"
    ));
}

#[tokio::test]
async fn parallel_tool_calls_preserve_result_order() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![
                ToolCall::new("c1", "read_file", json!({"file_path": "a.txt"})),
                ToolCall::new("c2", "read_file", json!({"file_path": "b.txt"})),
            ],
        ),
        text_response("r2", "done"),
    ]));
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());
    session
        .execution_env()
        .write_file("a.txt", "alpha")
        .await
        .expect("write a");
    session
        .execution_env()
        .write_file("b.txt", "bravo")
        .await
        .expect("write b");

    session.submit("read both").await.expect("submit");

    let results = tool_results_of(session.history());
    assert_eq!(results[0].results[0].tool_call_id, "c1");
    assert!(results[0].results[0].content.contains("alpha"));
    assert_eq!(results[0].results[1].tool_call_id, "c2");
    assert!(results[0].results[1].content.contains("bravo"));
    assert_call_result_pairing(session.history());
}

#[tokio::test]
async fn context_usage_warning_fires_past_eighty_percent() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([text_response(
        "r1",
        "y".repeat(600),
    )]));
    let emitter = Arc::new(CapturingEmitter::default());
    let profile = Arc::new(StaticProfile {
        capabilities: crate::ProviderCapabilities {
            context_window_size: 100,
            supports_parallel_tool_calls: false,
            supports_reasoning: true,
            supports_streaming: false,
        },
        ..StaticProfile::minimal(ToolRegistry::new())
    });
    let env = Arc::new(LocalExecutionEnvironment::new(dir.path()));
    let mut session = Session::with_emitter(
        profile,
        env,
        completer,
        SessionConfig::default(),
        emitter.clone(),
    );

    session.submit("hello").await.expect("submit");

    let warning = emitter.last_of(EventKind::Warning).expect("warning event");
    assert!(warning
        .str_field("message")
        .is_some_and(|message| message.starts_with("Context usage at ~")));
}

#[tokio::test]
async fn user_instructions_are_appended_last_to_the_system_prompt() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([text_response("r1", "ok")]));
    let completer_probe = completer.clone();
    let mut config = SessionConfig::default();
    config.user_instructions = Some("Be terse.".to_string());
    let (mut session, _emitter) = anthropic_session(completer, dir.path(), config);

    session.submit("hello").await.expect("submit");

    let request = &completer_probe.requests()[0];
    assert_eq!(request.messages[0].role, Role::System);
    let system_text = request.messages[0].text_content();
    assert!(system_text.ends_with("# User Instructions\n\nBe terse."));
}

#[tokio::test]
async fn empty_input_is_accepted_as_an_empty_user_turn() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([text_response("r1", "ok")]));
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.submit("").await.expect("submit");
    assert!(matches!(
        &session.history()[0],
        Turn::User(turn) if turn.content.is_empty()
    ));
}

#[tokio::test]
async fn events_for_one_round_arrive_in_program_order() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new("c1", "shell", json!({"command": "echo hi"}))],
        ),
        text_response("r2", "done"),
    ]));
    let (mut session, emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.submit("go").await.expect("submit");

    let kinds = emitter.kinds();
    let position = |kind: EventKind| {
        kinds
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_else(|| panic!("missing {kind:?}"))
    };
    assert!(position(EventKind::SessionStart) < position(EventKind::UserInput));
    assert!(position(EventKind::UserInput) < position(EventKind::AssistantTextStart));
    assert!(position(EventKind::AssistantTextStart) < position(EventKind::ToolCallStart));
    assert!(position(EventKind::ToolCallStart) < position(EventKind::ToolCallEnd));
    assert!(position(EventKind::ToolCallEnd) < position(EventKind::SessionEnd));
}

#[tokio::test]
async fn send_input_to_an_unknown_subagent_is_recovered() {
    let dir = tempdir().expect("tempdir");
    let completer = Arc::new(StaticCompleter::scripted([
        tool_call_response(
            "r1",
            "",
            vec![ToolCall::new(
                "c1",
                "send_input",
                json!({"agent_id": "missing", "message": "hi"}),
            )],
        ),
        text_response("r2", "done"),
    ]));
    let (mut session, _emitter) =
        anthropic_session(completer, dir.path(), SessionConfig::default());

    session.submit("talk to nobody").await.expect("submit");

    let results = tool_results_of(session.history());
    assert!(results[0].results[0].is_error);
    assert!(results[0].results[0]
        .content
        .contains("subagent missing not found"));
}
