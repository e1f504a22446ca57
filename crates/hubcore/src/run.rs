use crate::{ErrorKind, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RunId = Uuid;

/// Lifecycle of a run. Transitions only move forward:
/// `Idle -> Queued? -> Running -> Completed | Failed | Stopped`.
/// A queued run may also go straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Queued,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node state within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodePhase {
    Pending,
    Started,
    Completed,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub node_type: String,
    pub phase: NodePhase,
    /// Total invocations, including retries and loop revisits.
    pub attempts: u32,
    /// Retries consumed so far; never exceeds the node's `maxRetries`.
    pub retries: u32,
    pub last_duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl NodeRecord {
    pub fn new(node_id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            phase: NodePhase::Pending,
            attempts: 0,
            retries: 0,
            last_duration_ms: None,
            error: None,
        }
    }
}

/// Read-only projection of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub status: RunStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub cancelled: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub nodes: Vec<NodeRecord>,
}

impl RunSnapshot {
    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.node_id == id)
    }
}

/// Terminal run retained after leaving the running set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub run: RunSnapshot,
    pub node_count: usize,
}

impl From<RunSnapshot> for HistoryEntry {
    fn from(run: RunSnapshot) -> Self {
        let node_count = run.nodes.len();
        Self { run, node_count }
    }
}
