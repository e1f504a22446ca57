use crate::config::EngineConfig;
use crate::history::HistoryStore;
use crate::metrics::{self as run_metrics, MetricsCollector, MetricsSnapshot};
use crate::queue::AdmissionQueue;
use crate::registry::ExecutorRegistry;
use crate::run::{lock, RunHandle};
use crate::validate::validate_definition;
use crate::walker::RunWalker;
use chrono::Utc;
use hubcore::{
    ErrorKind, EventBus, ExecutionEvent, HistoryEntry, HubError, NodeExecutor, RunError, RunId, RunSnapshot,
    RunStatus, WorkflowDefinition,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Admits workflow runs under a concurrency cap and drives them to a
/// terminal state.
///
/// Cheap to clone; clones share the same running set, queue, history and
/// metrics.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: Arc<ExecutorRegistry>,
    events: EventBus,
    scheduler: Mutex<Scheduler>,
    history: Mutex<HistoryStore>,
    metrics: Mutex<MetricsCollector>,
    /// Runtime current at construction; walkers are spawned onto it
    runtime: Option<Handle>,
}

/// The only state shared across concurrent completions. Admission checks,
/// starts and drains all happen while holding its lock.
struct Scheduler {
    running: HashMap<RunId, Arc<RunHandle>>,
    queue: AdmissionQueue<Arc<RunHandle>>,
}

impl Engine {
    /// Create an engine with an empty registry
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(ExecutorRegistry::new()), config)
    }

    /// Create an engine around a pre-populated registry.
    ///
    /// When called inside a Tokio runtime the engine keeps a handle to it,
    /// so later submissions may come from threads outside any runtime.
    pub fn with_registry(registry: Arc<ExecutorRegistry>, config: EngineConfig) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        let history = HistoryStore::new(config.max_history_size);

        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                events,
                scheduler: Mutex::new(Scheduler {
                    running: HashMap::new(),
                    queue: AdmissionQueue::new(),
                }),
                history: Mutex::new(history),
                metrics: Mutex::new(MetricsCollector::new()),
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.inner.registry
    }

    /// Register an executor; the first registration of a type wins
    pub fn register_executor(&self, executor: Arc<dyn NodeExecutor>) -> Result<(), HubError> {
        self.inner.registry.register(executor)
    }

    /// Submit a workflow for execution.
    ///
    /// The run is either started (status `running` on return) or queued
    /// (status `queued`) when the cap is reached. Malformed definitions are
    /// rejected before a run is created.
    ///
    /// Runs execute on the runtime the engine was built in, or else on the
    /// caller's runtime. With neither, the run is recorded as failed.
    pub fn submit(&self, definition: WorkflowDefinition) -> Result<RunId, HubError> {
        self.submit_with_inputs(definition, HashMap::new())
    }

    /// Like [`submit`](Self::submit), handing `inputs` to the entry nodes
    pub fn submit_with_inputs(
        &self,
        definition: WorkflowDefinition,
        inputs: HashMap<String, Value>,
    ) -> Result<RunId, HubError> {
        validate_definition(
            &definition,
            &self.inner.registry,
            self.inner.config.default_max_retries,
        )?;

        let handle = RunHandle::new(definition, inputs);
        let run_id = handle.id();

        let mut scheduler = lock(&self.inner.scheduler);
        if scheduler.running.len() < self.inner.cap() {
            self.inner.start(&mut scheduler, handle);
        } else {
            handle.with_run(|run| run.mark_queued());
            let definition = Arc::clone(handle.definition());
            let position = scheduler.queue.enqueue(handle);

            info!(
                "Queued run {} for workflow '{}' at position {}",
                run_id, definition.name, position
            );
            self.inner.events.emit(ExecutionEvent::RunQueued {
                run_id,
                workflow_id: definition.id,
                workflow_name: definition.name.clone(),
                position,
                timestamp: Utc::now(),
            });
        }
        self.inner.publish_load(&scheduler);

        Ok(run_id)
    }

    /// Current view of a run: live while queued or running, from history
    /// afterwards. `None` once the run has been evicted from history.
    pub fn status(&self, run_id: RunId) -> Option<RunSnapshot> {
        let active = {
            let scheduler = lock(&self.inner.scheduler);
            scheduler
                .running
                .get(&run_id)
                .or_else(|| scheduler.queue.get(run_id))
                .cloned()
        };

        match active {
            Some(handle) => Some(handle.snapshot()),
            None => lock(&self.inner.history).get(run_id).map(|e| e.run.clone()),
        }
    }

    /// Wait until a run reaches a terminal state and return its final snapshot
    pub async fn wait(&self, run_id: RunId) -> Option<RunSnapshot> {
        let active = {
            let scheduler = lock(&self.inner.scheduler);
            scheduler
                .running
                .get(&run_id)
                .or_else(|| scheduler.queue.get(run_id))
                .cloned()
        };

        match active {
            Some(handle) => {
                handle.wait_done().await;
                Some(handle.snapshot())
            }
            None => self.status(run_id),
        }
    }

    /// Stop a queued or running run.
    ///
    /// Returns `true` only for the call that actually stopped it.
    pub fn stop(&self, run_id: RunId) -> bool {
        let mut scheduler = lock(&self.inner.scheduler);

        let handle = match scheduler.running.remove(&run_id) {
            Some(handle) => handle,
            None => match scheduler.queue.remove(run_id) {
                Some(handle) => handle,
                None => return false,
            },
        };

        handle.cancel();
        self.inner.finalize(
            &handle,
            RunStatus::Stopped,
            Some(RunError::Cancelled("Run stopped by request".to_string())),
        );
        self.inner.drain(&mut scheduler);
        self.inner.publish_load(&scheduler);
        true
    }

    /// Stop everything that is queued or running. Returns how many runs
    /// were stopped.
    pub fn shutdown(&self) -> usize {
        let mut scheduler = lock(&self.inner.scheduler);

        // Queue first, so nothing gets admitted while running runs stop.
        let mut stopped = scheduler.queue.drain_all();
        stopped.extend(scheduler.running.drain().map(|(_, handle)| handle));

        for handle in &stopped {
            handle.cancel();
            self.inner.finalize(
                handle,
                RunStatus::Stopped,
                Some(RunError::Cancelled("Engine shutting down".to_string())),
            );
        }
        self.inner.publish_load(&scheduler);

        info!("Engine shutdown stopped {} runs", stopped.len());
        stopped.len()
    }

    /// Terminal runs, newest first
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        lock(&self.inner.history).recent(limit)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.inner.metrics).snapshot()
    }

    pub fn running_count(&self) -> usize {
        lock(&self.inner.scheduler).running.len()
    }

    pub fn queued_count(&self) -> usize {
        lock(&self.inner.scheduler).queue.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }
}

impl EngineInner {
    fn cap(&self) -> usize {
        self.config.max_concurrent_runs.max(1)
    }

    /// Move a run into the running set and spawn its walker.
    ///
    /// Caller holds the scheduler lock, which makes the cap check and the
    /// insertion one atomic step.
    fn start(self: &Arc<Self>, scheduler: &mut Scheduler, handle: Arc<RunHandle>) {
        let run_id = handle.id();
        if !handle.with_run(|run| run.mark_running()) {
            return;
        }
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            error!("No Tokio runtime to execute run {} on", run_id);
            self.finalize(
                &handle,
                RunStatus::Failed,
                Some(RunError::Structural(
                    "No Tokio runtime available to execute the run".to_string(),
                )),
            );
            return;
        };
        scheduler.running.insert(run_id, Arc::clone(&handle));

        let definition = Arc::clone(handle.definition());
        info!(
            "Starting run {} for workflow '{}' ({} nodes)",
            run_id,
            definition.name,
            definition.nodes.len()
        );
        self.events.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow_id: definition.id,
            workflow_name: definition.name.clone(),
            timestamp: Utc::now(),
        });

        let inner = Arc::clone(self);
        runtime.spawn(async move {
            let walker = RunWalker::new(
                Arc::clone(&inner.registry),
                inner.events.clone(),
                inner.config.clone(),
                Arc::clone(&handle),
            );
            let outcome = walker.walk().await;
            inner.complete(&handle, outcome);
        });
    }

    /// Called by the walker task when it returns.
    fn complete(self: &Arc<Self>, handle: &Arc<RunHandle>, outcome: Result<(), RunError>) {
        let mut scheduler = lock(&self.scheduler);

        // Already gone when `stop` got there first.
        if scheduler.running.remove(&handle.id()).is_none() {
            return;
        }

        let (status, error) = match outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) if handle.is_cancelled() => (RunStatus::Stopped, Some(e)),
            Err(e) => (RunStatus::Failed, Some(e)),
        };

        self.finalize(handle, status, error);
        self.drain(&mut scheduler);
        self.publish_load(&scheduler);
    }

    /// Record a terminal transition: freeze the snapshot, publish, append
    /// to history and update metrics.
    fn finalize(&self, handle: &RunHandle, status: RunStatus, error: Option<RunError>) {
        let Some(snapshot) = handle.finish(status, error) else {
            return;
        };

        let run_id = snapshot.id;
        let duration_ms = snapshot.duration_ms.unwrap_or(0);
        let timestamp = Utc::now();

        let event = match (status, &snapshot.error, snapshot.error_kind) {
            (RunStatus::Completed, _, _) => {
                info!("Run {} completed in {}ms", run_id, duration_ms);
                ExecutionEvent::RunCompleted {
                    run_id,
                    duration_ms,
                    timestamp,
                }
            }
            (RunStatus::Stopped, _, _) => {
                info!("Run {} stopped after {}ms", run_id, duration_ms);
                ExecutionEvent::RunStopped {
                    run_id,
                    duration_ms,
                    timestamp,
                }
            }
            (_, error_message, kind) => {
                let message = error_message.clone().unwrap_or_default();
                error!("Run {} failed after {}ms: {}", run_id, duration_ms, message);
                ExecutionEvent::RunFailed {
                    run_id,
                    error: message,
                    error_kind: kind.unwrap_or(ErrorKind::Execution),
                    duration_ms,
                    timestamp,
                }
            }
        };
        self.events.emit(event);

        lock(&self.metrics).record(status, duration_ms, snapshot.error.as_deref());
        lock(&self.history).push(HistoryEntry::from(snapshot));
    }

    /// Admit queued runs, oldest first, while there is room.
    fn drain(self: &Arc<Self>, scheduler: &mut Scheduler) {
        while scheduler.running.len() < self.cap() {
            let Some(next) = scheduler.queue.dequeue() else {
                break;
            };
            self.start(scheduler, next);
        }
    }

    fn publish_load(&self, scheduler: &Scheduler) {
        run_metrics::set_load(scheduler.running.len(), scheduler.queue.len());
    }
}
