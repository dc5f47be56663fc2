use super::{Session, SessionState};
use crate::events::EventKind;
use crate::prompt::discover_project_docs;
use crate::subagent::is_subagent_tool;
use crate::truncation::truncate_tool_output;
use crate::{AgentError, ExecutionEnvironment, Turn};
use lathe_llm::{Message, Request, ToolCall, ToolChoice, ToolResult};
use serde_json::json;
use std::collections::VecDeque;
use tracing::{debug, warn};

impl Session {
    /// Process one user input through the agentic loop, then any queued
    /// follow-ups. Synchronous from the caller's perspective: returns
    /// once the session is idle again (or closed by an error).
    pub async fn submit(&mut self, user_input: impl Into<String>) -> Result<(), AgentError> {
        if self.state == SessionState::Closed {
            return Err(AgentError::session_closed());
        }
        self.shared.abort.store(false, std::sync::atomic::Ordering::SeqCst);
        self.state = SessionState::Processing;

        // While the loop runs, a cancellation must also reach whatever
        // command is currently executing.
        let watchdog = {
            let cancel = self.shared.cancel.clone();
            let env = self.env.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                env.terminate_all_commands().await;
            })
        };

        let result = self.process_inputs(user_input.into()).await;
        watchdog.abort();
        result
    }

    async fn process_inputs(&mut self, first: String) -> Result<(), AgentError> {
        let mut pending = VecDeque::from([first]);
        while let Some(input) = pending.pop_front() {
            self.run_input(input).await?;
            while let Some(follow_up) = self.pop_followup() {
                pending.push_back(follow_up);
            }
        }

        self.state = SessionState::Idle;
        self.emit_bare(EventKind::SessionEnd);
        Ok(())
    }

    async fn run_input(&mut self, input: String) -> Result<(), AgentError> {
        debug!(session_id = %self.id, "processing user input");
        self.push_turn(Turn::user(input.clone()));
        self.emit(EventKind::UserInput, json!({ "content": input }));
        self.drain_steering();

        let mut round = 0usize;
        loop {
            if round >= self.config.max_tool_rounds_per_input {
                self.emit(EventKind::TurnLimit, json!({ "round": round }));
                break;
            }
            if self.config.max_turns > 0 && self.conversation_turns() >= self.config.max_turns {
                self.emit(
                    EventKind::TurnLimit,
                    json!({ "total_turns": self.conversation_turns() }),
                );
                break;
            }
            if self.abort_requested() {
                debug!(session_id = %self.id, "abort observed; leaving the loop");
                break;
            }
            if self.cancellation_requested() {
                return Err(self.fail_cancelled());
            }

            let request = self.build_request();
            self.emit_bare(EventKind::AssistantTextStart);

            let completer = self.completer.clone();
            let cancel = self.shared.cancel.clone();
            let outcome = tokio::select! {
                result = completer.complete(request) => Some(result),
                () = cancel.cancelled() => None,
            };
            let response = match outcome {
                None => return Err(self.fail_cancelled()),
                Some(Err(error)) => {
                    self.emit(EventKind::Error, json!({ "error": error.to_string() }));
                    if error.is_retryable() {
                        // Retries were the completer's job; the input is
                        // lost but the session stays usable.
                        warn!(session_id = %self.id, %error, "completion failed after retries");
                        self.state = SessionState::Idle;
                    } else {
                        warn!(session_id = %self.id, %error, "unrecoverable completion failure");
                        self.state = SessionState::Closed;
                        self.subagents.close_all();
                    }
                    return Err(AgentError::Completion(error));
                }
                Some(Ok(response)) => response,
            };

            let text = response.text();
            let reasoning = response.reasoning();
            let tool_calls = response.tool_calls();
            self.push_turn(Turn::assistant(
                text.clone(),
                tool_calls.clone(),
                reasoning.clone(),
                response.usage.clone(),
                Some(response.id.clone()),
            ));
            self.emit(
                EventKind::AssistantTextEnd,
                json!({ "text": text, "reasoning": reasoning }),
            );
            self.check_context_usage();

            if tool_calls.is_empty() {
                break;
            }

            round += 1;
            let results = self.execute_tool_calls(tool_calls).await;
            self.push_turn(Turn::tool_results(results));
            self.drain_steering();
            self.check_for_loop();
        }

        Ok(())
    }

    fn fail_cancelled(&mut self) -> AgentError {
        debug!(session_id = %self.id, "cancellation observed; closing session");
        self.emit(EventKind::Error, json!({ "error": "session cancelled" }));
        self.state = SessionState::Closed;
        self.subagents.close_all();
        AgentError::Cancelled
    }

    fn build_request(&self) -> Request {
        let project_docs = discover_project_docs(
            self.env.working_directory(),
            self.profile.project_instruction_file(),
        );
        let definitions = self.tools.definitions();
        let mut system_prompt =
            self.profile
                .build_system_prompt(self.env.as_ref(), &definitions, &project_docs);
        if let Some(instructions) = &self.config.user_instructions {
            system_prompt.push_str("\n\n# User Instructions\n\n");
            system_prompt.push_str(instructions);
        }

        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(crate::history_to_messages(&self.history));

        let tools = (!definitions.is_empty()).then_some(definitions);
        let tool_choice = tools.as_ref().map(|_| ToolChoice::auto());

        Request {
            model: self.profile.model_id().to_string(),
            messages,
            tools,
            tool_choice,
            reasoning_effort: self
                .config
                .reasoning_effort
                .map(|effort| effort.as_str().to_string()),
            provider: Some(self.profile.id().to_string()),
            provider_options: self.profile.provider_options(),
        }
    }

    /// Dispatch one assistant turn's tool calls. Result order always
    /// matches call order; execution is concurrent when the profile
    /// allows it and the batch stays clear of subagent tools (those need
    /// exclusive access to the session).
    pub(super) async fn execute_tool_calls(&mut self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let has_subagent_calls = calls.iter().any(|call| is_subagent_tool(&call.name));
        let parallel = self.profile.capabilities().supports_parallel_tool_calls
            && calls.len() > 1
            && !has_subagent_calls;

        if parallel {
            let in_flight: Vec<_> = calls
                .into_iter()
                .map(|call| self.execute_single(call))
                .collect();
            return futures::future::join_all(in_flight).await;
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = if is_subagent_tool(&call.name) {
                self.execute_subagent_call(call).await
            } else {
                self.execute_single(call).await
            };
            results.push(result);
        }
        results
    }

    /// Lookup → execute → truncate → emit. The event stream carries the
    /// full raw output; the model sees the truncated form. Failures are
    /// recovered into error-flagged results, never raised.
    pub(super) async fn execute_single(&self, call: ToolCall) -> ToolResult {
        self.emit(
            EventKind::ToolCallStart,
            json!({ "tool_name": call.name, "call_id": call.id }),
        );

        let Some(tool) = self.tools.get(&call.name) else {
            let message = format!("Unknown tool: {}", call.name);
            self.emit(
                EventKind::ToolCallEnd,
                json!({ "call_id": call.id, "error": message }),
            );
            return ToolResult {
                tool_call_id: call.id,
                content: message,
                is_error: true,
            };
        };

        match (tool.executor)(call.arguments.clone(), self.env.clone()).await {
            Ok(raw_output) => {
                let truncated = truncate_tool_output(&raw_output, &call.name, &self.config);
                self.emit(
                    EventKind::ToolCallEnd,
                    json!({ "call_id": call.id, "output": raw_output }),
                );
                ToolResult {
                    tool_call_id: call.id,
                    content: truncated,
                    is_error: false,
                }
            }
            Err(error) => {
                let message = format!("Tool error ({}): {}", call.name, error);
                self.emit(
                    EventKind::ToolCallEnd,
                    json!({ "call_id": call.id, "error": message }),
                );
                ToolResult {
                    tool_call_id: call.id,
                    content: message,
                    is_error: true,
                }
            }
        }
    }
}
