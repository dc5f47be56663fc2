use crate::turn::current_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    UserInput,
    AssistantTextStart,
    AssistantTextDelta,
    AssistantTextEnd,
    ToolCallStart,
    ToolCallOutputDelta,
    ToolCallEnd,
    SteeringInjected,
    TurnLimit,
    LoopDetection,
    Warning,
    Error,
}

/// A typed event delivered to the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    pub timestamp: String,
    pub session_id: String,
    pub data: Map<String, Value>,
}

impl SessionEvent {
    pub fn new(kind: EventKind, session_id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind,
            timestamp: current_timestamp(),
            session_id: session_id.into(),
            data,
        }
    }

    pub fn bare(kind: EventKind, session_id: impl Into<String>) -> Self {
        Self::new(kind, session_id, Map::new())
    }

    pub fn with(
        kind: EventKind,
        session_id: impl Into<String>,
        data: Value,
    ) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(kind, session_id, data)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Delivers events to the host without ever blocking the loop.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: SessionEvent);

    /// Idempotent; emits after close are silently discarded.
    fn close(&self) {}
}

#[derive(Default)]
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: SessionEvent) {}
}

/// Bounded-channel emitter. When the buffer is full the event is dropped
/// rather than applying backpressure to the loop.
pub struct ChannelEventEmitter {
    sender: Mutex<Option<mpsc::Sender<SessionEvent>>>,
}

impl ChannelEventEmitter {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let capacity = if capacity == 0 {
            DEFAULT_EVENT_BUFFER
        } else {
            capacity
        };
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }
}

impl EventEmitter for ChannelEventEmitter {
    fn emit(&self, event: SessionEvent) {
        let guard = self.sender.lock().expect("event sender mutex poisoned");
        if let Some(sender) = guard.as_ref() {
            // Overflow and host-side hangups both drop the event.
            let _ = sender.try_send(event);
        }
    }

    fn close(&self) {
        let mut guard = self.sender.lock().expect("event sender mutex poisoned");
        guard.take();
    }
}

/// Records every emitted event; the assertion surface for scenario tests.
#[derive(Default)]
pub struct CapturingEmitter {
    events: Mutex<Vec<SessionEvent>>,
}

impl CapturingEmitter {
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.events.lock().expect("capturing emitter poisoned").clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.snapshot().into_iter().map(|event| event.kind).collect()
    }

    pub fn last_of(&self, kind: EventKind) -> Option<SessionEvent> {
        self.snapshot()
            .into_iter()
            .rev()
            .find(|event| event.kind == kind)
    }
}

impl EventEmitter for CapturingEmitter {
    fn emit(&self, event: SessionEvent) {
        self.events
            .lock()
            .expect("capturing emitter poisoned")
            .push(event);
    }
}
