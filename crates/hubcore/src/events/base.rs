use crate::{ErrorKind, NodeId, RunId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Lifecycle transitions published by the engine.
///
/// Payloads carry ids, timing and error text only, never the live run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunQueued {
        run_id: RunId,
        workflow_id: WorkflowId,
        workflow_name: String,
        position: usize,
        timestamp: DateTime<Utc>,
    },
    RunStarted {
        run_id: RunId,
        workflow_id: WorkflowId,
        workflow_name: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunFailed {
        run_id: RunId,
        error: String,
        error_kind: ErrorKind,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunStopped {
        run_id: RunId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: NodeId,
        node_type: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: RunId,
        node_id: NodeId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeErrored {
        run_id: RunId,
        node_id: NodeId,
        error: String,
        error_kind: ErrorKind,
        attempt: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    NodeExecutionTime {
        run_id: RunId,
        node_id: NodeId,
        node_type: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        run_id: RunId,
        node_id: NodeId,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            ExecutionEvent::RunQueued { run_id, .. }
            | ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::RunCompleted { run_id, .. }
            | ExecutionEvent::RunFailed { run_id, .. }
            | ExecutionEvent::RunStopped { run_id, .. }
            | ExecutionEvent::NodeStarted { run_id, .. }
            | ExecutionEvent::NodeCompleted { run_id, .. }
            | ExecutionEvent::NodeErrored { run_id, .. }
            | ExecutionEvent::NodeExecutionTime { run_id, .. }
            | ExecutionEvent::NodeEvent { run_id, .. } => *run_id,
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::RunCompleted { .. }
                | ExecutionEvent::RunFailed { .. }
                | ExecutionEvent::RunStopped { .. }
        )
    }
}

/// Messages an executor publishes while it works
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
    Data { port: String, value: Value },
}

/// Event emitter handed to executors, bound to one node of one run
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, node_id: NodeId, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            run_id,
            node_id,
            sender,
        }
    }

    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(ExecutionEvent::NodeEvent {
            run_id: self.run_id,
            node_id: self.node_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(NodeEvent::Progress { percent, message });
    }

    /// Emit data on a specific port (for streaming)
    pub fn data(&self, port: impl Into<String>, value: Value) {
        self.emit(NodeEvent::Data {
            port: port.into(),
            value,
        });
    }
}

/// Fan-out of execution events.
///
/// Sending never blocks: with no subscribers the event is dropped, and a
/// subscriber that falls behind sees `RecvError::Lagged` instead of slowing
/// the engine down.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!("No subscribers for event of run {}", event.run_id());
        }
    }

    pub fn create_emitter(&self, run_id: RunId, node_id: NodeId) -> EventEmitter {
        EventEmitter::new(run_id, node_id, self.sender.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        bus.emit(ExecutionEvent::RunCompleted {
            run_id: Uuid::new_v4(),
            duration_ms: 1,
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn emitter_tags_events_with_run_and_node() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.create_emitter(run_id, "fetch".to_string()).info("hello");

        match rx.recv().await.unwrap() {
            ExecutionEvent::NodeEvent {
                run_id: got,
                node_id,
                event: NodeEvent::Info { message },
                ..
            } => {
                assert_eq!(got, run_id);
                assert_eq!(node_id, "fetch");
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ExecutionEvent::NodeErrored {
            run_id: Uuid::nil(),
            node_id: "a".into(),
            error: "Execution error: boom".into(),
            error_kind: ErrorKind::Execution,
            attempt: 2,
            will_retry: true,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "NodeErrored");
        assert_eq!(json["error_kind"], "execution");
    }
}
