use crate::events::{
    ChannelEventEmitter, EventEmitter, EventKind, SessionEvent, DEFAULT_EVENT_BUFFER,
};
use crate::subagent::{subagent_tool_registry, SubAgentManager};
use crate::tools::ToolRegistry;
use crate::{
    detect_loop, ExecutionEnvironment, ProviderProfile, ReasoningEffort, SessionConfig, Turn,
};
use lathe_llm::Completer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mod run;
mod spawn;
#[cfg(test)]
mod tests;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Processing,
    AwaitingInput,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::AwaitingInput => "awaiting_input",
            Self::Closed => "closed",
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals shared between a session and its handles. Queues sit behind a
/// mutex held only for push/pop; the loop drains them at safe points.
pub(crate) struct SessionShared {
    steering: Mutex<VecDeque<String>>,
    followups: Mutex<VecDeque<String>>,
    abort: AtomicBool,
    cancel: CancellationToken,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            steering: Mutex::new(VecDeque::new()),
            followups: Mutex::new(VecDeque::new()),
            abort: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }
}

/// Cloneable handle for signalling a session from other tasks: steering
/// and follow-up injection, cooperative abort, and hard cancellation.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Queue a message injected as a steering turn at the next safe point.
    pub fn steer(&self, message: impl Into<String>) {
        self.shared
            .steering
            .lock()
            .expect("steering queue poisoned")
            .push_back(message.into());
    }

    /// Queue a message processed as a fresh input after the current one.
    pub fn follow_up(&self, message: impl Into<String>) {
        self.shared
            .followups
            .lock()
            .expect("follow-up queue poisoned")
            .push_back(message.into());
    }

    /// Cooperative stop: the loop exits at its next check point without
    /// discarding tool results already produced.
    pub fn abort(&self) {
        self.shared.abort.store(true, Ordering::SeqCst);
    }

    /// Hard stop: interrupts the in-flight completion, kills running
    /// commands, and closes the session.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }
}

/// Central orchestrator: conversation history, the per-input loop,
/// steering and follow-up queues, budget enforcement, and subagent
/// ownership.
pub struct Session {
    id: String,
    profile: Arc<dyn ProviderProfile>,
    env: Arc<dyn ExecutionEnvironment>,
    completer: Arc<dyn Completer>,
    /// The session's effective toolset: a deep clone of the profile's
    /// registry, with subagent tools merged in when depth allows.
    tools: ToolRegistry,
    history: Vec<Turn>,
    emitter: Arc<dyn EventEmitter>,
    event_stream: Option<mpsc::Receiver<SessionEvent>>,
    config: SessionConfig,
    state: SessionState,
    shared: Arc<SessionShared>,
    pub(crate) subagents: SubAgentManager,
}

impl Session {
    /// Create a session with its own bounded event channel; the receiver
    /// is claimed through [`Session::events`].
    pub fn new(
        profile: Arc<dyn ProviderProfile>,
        env: Arc<dyn ExecutionEnvironment>,
        completer: Arc<dyn Completer>,
        config: SessionConfig,
    ) -> Self {
        let (emitter, receiver) = ChannelEventEmitter::bounded(DEFAULT_EVENT_BUFFER);
        Self::build(profile, env, completer, config, Arc::new(emitter), Some(receiver))
    }

    /// Create a session delivering events through a caller-supplied
    /// emitter. Subagents use this to share their parent's emitter.
    pub fn with_emitter(
        profile: Arc<dyn ProviderProfile>,
        env: Arc<dyn ExecutionEnvironment>,
        completer: Arc<dyn Completer>,
        config: SessionConfig,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self::build(profile, env, completer, config, emitter, None)
    }

    fn build(
        profile: Arc<dyn ProviderProfile>,
        env: Arc<dyn ExecutionEnvironment>,
        completer: Arc<dyn Completer>,
        config: SessionConfig,
        emitter: Arc<dyn EventEmitter>,
        event_stream: Option<mpsc::Receiver<SessionEvent>>,
    ) -> Self {
        let tools = profile.tool_registry().as_ref().clone();
        let depth = config.current_depth;
        // A session at maximum depth never exposes spawn/send/wait/close.
        if depth < config.max_subagent_depth {
            tools.merge_from(&subagent_tool_registry());
        }

        let session = Self {
            id: Uuid::new_v4().to_string(),
            subagents: SubAgentManager::new(config.max_subagent_depth, depth),
            profile,
            env,
            completer,
            tools,
            history: Vec::new(),
            emitter,
            event_stream,
            config,
            state: SessionState::Idle,
            shared: Arc::new(SessionShared::new()),
        };
        session.emit_bare(EventKind::SessionStart);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn execution_env(&self) -> Arc<dyn ExecutionEnvironment> {
        self.env.clone()
    }

    /// Names of the tools this session exposes to the model.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    /// Claim the event receiver. Only available once, and only on
    /// sessions built with their own channel.
    pub fn events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_stream.take()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn steer(&self, message: impl Into<String>) {
        self.handle().steer(message);
    }

    pub fn follow_up(&self, message: impl Into<String>) {
        self.handle().follow_up(message);
    }

    pub fn abort(&self) {
        self.handle().abort();
    }

    /// Applies to subsequent completion requests only.
    pub fn set_reasoning_effort(&mut self, effort: Option<ReasoningEffort>) {
        self.config.reasoning_effort = effort;
    }

    /// Terminal: cancels and closes subagents, closes the event channel.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.subagents.close_all();
        self.emit(
            EventKind::SessionEnd,
            json!({ "state": SessionState::Closed.as_str() }),
        );
        self.emitter.close();
    }

    pub(crate) fn emit(&self, kind: EventKind, data: Value) {
        self.emitter.emit(SessionEvent::with(kind, self.id.clone(), data));
    }

    pub(crate) fn emit_bare(&self, kind: EventKind) {
        self.emitter.emit(SessionEvent::bare(kind, self.id.clone()));
    }

    pub(crate) fn push_turn(&mut self, turn: Turn) {
        self.history.push(turn);
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.shared.abort.load(Ordering::SeqCst)
    }

    pub(crate) fn cancellation_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub(crate) fn pop_followup(&self) -> Option<String> {
        self.shared
            .followups
            .lock()
            .expect("follow-up queue poisoned")
            .pop_front()
    }

    /// Append every queued steering message as a steering turn. The queue
    /// is drained atomically; each turn is announced on the event stream.
    pub(crate) fn drain_steering(&mut self) {
        let queued: Vec<String> = {
            let mut queue = self
                .shared
                .steering
                .lock()
                .expect("steering queue poisoned");
            queue.drain(..).collect()
        };
        for message in queued {
            self.push_turn(Turn::steering(message.clone()));
            self.emit(EventKind::SteeringInjected, json!({ "content": message }));
        }
    }

    /// Inject a steering warning when recent tool calls repeat. Runs
    /// after the tool-results turn is recorded, so the warning is visible
    /// to the next model call only.
    pub(crate) fn check_for_loop(&mut self) {
        if !self.config.enable_loop_detection {
            return;
        }
        if !detect_loop(&self.history, self.config.loop_detection_window) {
            return;
        }
        let warning = format!(
            "Loop detected: the last {} tool calls follow a repeating pattern. Try a different approach.",
            self.config.loop_detection_window
        );
        tracing::debug!(session_id = %self.id, "tool-call loop detected");
        self.push_turn(Turn::steering(warning.clone()));
        self.emit(EventKind::LoopDetection, json!({ "message": warning }));
    }

    /// Warn when approximate context usage crosses 80% of the profile's
    /// window. Re-checked after every assistant turn.
    pub(crate) fn check_context_usage(&self) {
        let window = self.profile.capabilities().context_window_size;
        if window == 0 {
            return;
        }
        let approx_tokens = approximate_history_chars(&self.history) / 4;
        if approx_tokens.saturating_mul(10) <= window.saturating_mul(8) {
            return;
        }
        let percent = approx_tokens.saturating_mul(100) / window;
        self.emit(
            EventKind::Warning,
            json!({
                "message": format!("Context usage at ~{percent}% of context window"),
                "approx_tokens": approx_tokens,
                "context_window_size": window,
            }),
        );
    }

    /// User + assistant turns, the unit `max_turns` is measured in.
    pub(crate) fn conversation_turns(&self) -> usize {
        self.history
            .iter()
            .filter(|turn| matches!(turn, Turn::User(_) | Turn::Assistant(_)))
            .count()
    }
}

/// Character mass of the history, the basis for the chars/4 token
/// estimate.
pub(crate) fn approximate_history_chars(history: &[Turn]) -> usize {
    history
        .iter()
        .map(|turn| match turn {
            Turn::User(turn) => turn.content.chars().count(),
            Turn::System(turn) => turn.content.chars().count(),
            Turn::Steering(turn) => turn.content.chars().count(),
            Turn::Assistant(turn) => {
                let mut chars = turn.content.chars().count();
                if let Some(reasoning) = &turn.reasoning {
                    chars += reasoning.chars().count();
                }
                for call in &turn.tool_calls {
                    chars += call.id.chars().count();
                    chars += call.name.chars().count();
                    chars += call.arguments_json().chars().count();
                }
                chars
            }
            Turn::ToolResults(turn) => turn
                .results
                .iter()
                .map(|result| result.tool_call_id.chars().count() + result.content.chars().count())
                .sum(),
        })
        .sum()
}
