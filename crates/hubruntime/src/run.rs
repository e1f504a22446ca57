use crate::queue::Queued;
use chrono::{DateTime, Utc};
use hubcore::{
    NodeRecord, RunError, RunId, RunSnapshot, RunStatus, WorkflowDefinition,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lock a std mutex, recovering the data if a holder panicked.
///
/// None of the engine's critical sections leave their state half-updated
/// across a panic point, so the inner value is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable state of one execution of a workflow
#[derive(Debug)]
pub(crate) struct Run {
    pub id: RunId,
    pub definition: Arc<WorkflowDefinition>,
    pub status: RunStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub cancelled: bool,
    pub error: Option<RunError>,
    pub nodes: Vec<NodeRecord>,
}

impl Run {
    pub fn new(definition: Arc<WorkflowDefinition>) -> Self {
        let nodes = definition
            .nodes
            .iter()
            .map(|n| NodeRecord::new(n.id.clone(), n.node_type.clone()))
            .collect();

        Self {
            id: Uuid::new_v4(),
            definition,
            status: RunStatus::Idle,
            submitted_at: Utc::now(),
            started_at: None,
            started: None,
            ended_at: None,
            duration_ms: None,
            cancelled: false,
            error: None,
            nodes,
        }
    }

    pub fn mark_queued(&mut self) -> bool {
        if self.status != RunStatus::Idle {
            return false;
        }
        self.status = RunStatus::Queued;
        true
    }

    pub fn mark_running(&mut self) -> bool {
        if !matches!(self.status, RunStatus::Idle | RunStatus::Queued) {
            return false;
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
        true
    }

    /// First terminal transition wins; later calls are ignored.
    pub fn finish(&mut self, status: RunStatus, error: Option<RunError>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.duration_ms = Some(
            self.started
                .map(|s| s.elapsed().as_millis() as u64)
                .unwrap_or(0),
        );
        self.error = error;
        true
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id,
            workflow_id: self.definition.id,
            workflow_name: self.definition.name.clone(),
            status: self.status,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_ms: self.duration_ms,
            cancelled: self.cancelled,
            error: self.error.as_ref().map(|e| e.to_string()),
            error_kind: self.error.as_ref().map(|e| e.kind()),
            nodes: self.nodes.clone(),
        }
    }
}

/// Shared handle to a run: the scheduler, the walker task and `stop` all
/// hold one.
pub(crate) struct RunHandle {
    id: RunId,
    definition: Arc<WorkflowDefinition>,
    inputs: HashMap<String, Value>,
    cancellation: CancellationToken,
    state: Mutex<Run>,
    final_snapshot: Mutex<Option<RunSnapshot>>,
    done: watch::Sender<bool>,
}

impl RunHandle {
    pub fn new(definition: WorkflowDefinition, inputs: HashMap<String, Value>) -> Arc<Self> {
        let definition = Arc::new(definition);
        let run = Run::new(Arc::clone(&definition));
        let (done, _) = watch::channel(false);

        Arc::new(Self {
            id: run.id,
            definition,
            inputs,
            cancellation: CancellationToken::new(),
            state: Mutex::new(run),
            final_snapshot: Mutex::new(None),
            done,
        })
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn inputs(&self) -> &HashMap<String, Value> {
        &self.inputs
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Raise the cancellation signal. It never reverts.
    pub fn cancel(&self) {
        self.cancellation.cancel();
        lock(&self.state).cancelled = true;
    }

    pub fn with_run<R>(&self, f: impl FnOnce(&mut Run) -> R) -> R {
        f(&mut lock(&self.state))
    }

    pub fn with_node<R>(&self, index: usize, f: impl FnOnce(&mut NodeRecord) -> R) -> Option<R> {
        lock(&self.state).nodes.get_mut(index).map(f)
    }

    pub fn status(&self) -> RunStatus {
        lock(&self.state).status
    }

    /// Terminal snapshot once finished, live view before that
    pub fn snapshot(&self) -> RunSnapshot {
        if let Some(snapshot) = lock(&self.final_snapshot).as_ref() {
            return snapshot.clone();
        }
        lock(&self.state).snapshot()
    }

    /// Freeze the run at a terminal status.
    ///
    /// Returns the terminal snapshot, or `None` if the run had already
    /// finished.
    pub fn finish(&self, status: RunStatus, error: Option<RunError>) -> Option<RunSnapshot> {
        let snapshot = {
            let mut run = lock(&self.state);
            if !run.finish(status, error) {
                return None;
            }
            run.snapshot()
        };
        *lock(&self.final_snapshot) = Some(snapshot.clone());
        self.done.send_replace(true);
        Some(snapshot)
    }

    pub async fn wait_done(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Queued for Arc<RunHandle> {
    fn run_id(&self) -> RunId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubcore::NodeInstance;

    fn handle() -> Arc<RunHandle> {
        let wf = WorkflowDefinition::new("t")
            .with_node(NodeInstance::new("a", "flow.start"))
            .with_node(NodeInstance::new("b", "flow.end"));
        RunHandle::new(wf, HashMap::new())
    }

    #[test]
    fn transitions_only_move_forward() {
        let handle = handle();
        assert_eq!(handle.status(), RunStatus::Idle);
        assert!(handle.with_run(|r| r.mark_queued()));
        assert!(handle.with_run(|r| r.mark_running()));
        assert!(!handle.with_run(|r| r.mark_queued()));

        assert!(handle.finish(RunStatus::Completed, None).is_some());
        assert!(handle.finish(RunStatus::Failed, None).is_none());
        assert!(!handle.with_run(|r| r.mark_running()));
        assert_eq!(handle.snapshot().status, RunStatus::Completed);
    }

    #[test]
    fn terminal_snapshot_is_frozen() {
        let handle = handle();
        handle.with_run(|r| r.mark_running());
        handle.finish(RunStatus::Stopped, Some(RunError::Cancelled("stop".into())));

        handle.with_node(0, |n| n.attempts = 9);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.nodes[0].attempts, 0);
        assert_eq!(snapshot.error_kind, Some(hubcore::ErrorKind::Cancellation));
    }

    #[test]
    fn cancel_sets_the_flag() {
        let handle = handle();
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(handle.snapshot().cancelled);
    }

    #[tokio::test]
    async fn wait_done_resolves_after_finish() {
        let handle = handle();
        handle.with_run(|r| r.mark_running());
        handle.finish(RunStatus::Completed, None);
        handle.wait_done().await;
    }
}
