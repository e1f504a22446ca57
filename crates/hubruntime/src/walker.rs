use crate::config::EngineConfig;
use crate::metrics::record_node_execution;
use crate::registry::ExecutorRegistry;
use crate::run::RunHandle;
use crate::validate::cyclic_nodes;
use chrono::Utc;
use hubcore::{
    EventBus, ExecutionEvent, FlowControl, NodeContext, NodeExecutor, NodeInstance, NodeMemory,
    NodeOutput, NodePhase, OnError, RunError, WorkflowDefinition,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Walks one run's nodes, one at a time.
///
/// Without connections the walk follows declaration order. With connections
/// it starts at nodes that have no incoming edge and proceeds breadth-first
/// along the edges each node activates. Branching and looping are decided by
/// executors through [`FlowControl`]; the walker only follows directions.
///
/// A node joins its predecessors: it waits until every incoming edge from a
/// node outside any cycle is resolved, either followed or known never to
/// fire. Edges leaving a node on a cycle fire each time they are followed, so
/// loop bodies and loop exits are revisited without waiting.
pub(crate) struct RunWalker {
    registry: Arc<ExecutorRegistry>,
    events: EventBus,
    config: EngineConfig,
    handle: Arc<RunHandle>,
    definition: Arc<WorkflowDefinition>,
    outputs: HashMap<usize, HashMap<String, Value>>,
    memory: HashMap<usize, Arc<RwLock<NodeMemory>>>,
    cyclic: Vec<bool>,
    /// Per connection: `None` until its source finishes, then whether it fired
    edges: Vec<Option<bool>>,
    triggered: Vec<bool>,
    settled: Vec<bool>,
    executions: usize,
}

enum Readiness {
    Ready,
    Waiting,
    Dead,
}

impl RunWalker {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        events: EventBus,
        config: EngineConfig,
        handle: Arc<RunHandle>,
    ) -> Self {
        let definition = Arc::clone(handle.definition());
        let node_count = definition.nodes.len();
        Self {
            registry,
            events,
            config,
            handle,
            cyclic: cyclic_nodes(&definition),
            edges: vec![None; definition.connections.len()],
            triggered: vec![false; node_count],
            settled: vec![false; node_count],
            executions: 0,
            definition,
            outputs: HashMap::new(),
            memory: HashMap::new(),
        }
    }

    pub async fn walk(mut self) -> Result<(), RunError> {
        if self.definition.connections.is_empty() {
            self.walk_linear().await
        } else {
            self.walk_graph().await
        }
    }

    async fn walk_linear(&mut self) -> Result<(), RunError> {
        for idx in 0..self.definition.nodes.len() {
            self.count_execution()?;
            if self.run_node(idx).await? == FlowControl::Halt {
                break;
            }
        }
        Ok(())
    }

    async fn walk_graph(&mut self) -> Result<(), RunError> {
        let mut frontier: VecDeque<usize> = self.entry_points().into();
        let mut waiting: HashSet<usize> = frontier.iter().copied().collect();

        while let Some(idx) = frontier.pop_front() {
            waiting.remove(&idx);
            self.triggered[idx] = false;

            self.count_execution()?;
            let flow = self.run_node(idx).await?;
            self.settled[idx] = true;

            for next in self.resolve_outgoing(idx, flow) {
                if waiting.insert(next) {
                    frontier.push_back(next);
                }
            }
        }

        Ok(())
    }

    fn count_execution(&mut self) -> Result<(), RunError> {
        if self.executions >= self.config.max_node_executions {
            return Err(RunError::Structural(format!(
                "Run exceeded {} node executions",
                self.config.max_node_executions
            )));
        }
        self.executions += 1;
        Ok(())
    }

    fn entry_points(&self) -> Vec<usize> {
        let roots: Vec<usize> = self
            .definition
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !self.definition.has_incoming(&node.id))
            .map(|(idx, _)| idx)
            .collect();

        // Every node sits on a cycle: enter at the first declared one.
        if roots.is_empty() && !self.definition.nodes.is_empty() {
            vec![0]
        } else {
            roots
        }
    }

    /// Record which outgoing edges of a finished node fired and return the
    /// nodes that became ready. Nodes that can no longer be reached pass
    /// that on to their own successors.
    fn resolve_outgoing(&mut self, idx: usize, flow: FlowControl) -> Vec<usize> {
        let definition = Arc::clone(&self.definition);
        let mut ready = Vec::new();
        let mut pending = vec![(idx, Some(flow))];

        while let Some((source, flow)) = pending.pop() {
            let source_id = &definition.nodes[source].id;
            let mut targets = Vec::new();

            for (edge, conn) in definition.connections.iter().enumerate() {
                if &conn.from_node != source_id {
                    continue;
                }
                let fired = match &flow {
                    Some(FlowControl::Continue) => true,
                    Some(FlowControl::Follow(ports)) => ports.iter().any(|p| *p == conn.from_port),
                    Some(FlowControl::Halt) | None => false,
                };

                if fired {
                    self.edges[edge] = Some(true);
                } else if self.edges[edge].is_none() {
                    self.edges[edge] = Some(false);
                }

                if let Some(target) = definition.node_index(&conn.to_node) {
                    if fired {
                        self.triggered[target] = true;
                    }
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                }
            }

            for target in targets {
                match self.readiness(target) {
                    Readiness::Ready => {
                        if !ready.contains(&target) {
                            ready.push(target);
                        }
                    }
                    Readiness::Dead => {
                        debug!(
                            "Run {} node {} will not run",
                            self.handle.id(),
                            definition.nodes[target].id
                        );
                        self.settled[target] = true;
                        pending.push((target, None));
                    }
                    Readiness::Waiting => {}
                }
            }
        }

        ready
    }

    fn readiness(&self, idx: usize) -> Readiness {
        let node_id = &self.definition.nodes[idx].id;
        let mut joins_resolved = true;
        let mut fed_by_cycle = false;

        for (edge, conn) in self.definition.connections.iter().enumerate() {
            if &conn.to_node != node_id {
                continue;
            }
            let from_cycle = self
                .definition
                .node_index(&conn.from_node)
                .is_some_and(|from| self.cyclic[from]);
            if from_cycle {
                fed_by_cycle = true;
            } else if self.edges[edge].is_none() {
                joins_resolved = false;
            }
        }

        if !joins_resolved {
            Readiness::Waiting
        } else if self.triggered[idx] {
            Readiness::Ready
        } else if !self.settled[idx] && !fed_by_cycle {
            Readiness::Dead
        } else {
            Readiness::Waiting
        }
    }

    /// Gather inputs by port from whatever upstream nodes have produced.
    fn collect_inputs(&self, idx: usize) -> HashMap<String, Value> {
        let node_id = &self.definition.nodes[idx].id;

        if self.definition.connections.is_empty() {
            return match idx.checked_sub(1) {
                Some(prev) => self.outputs.get(&prev).cloned().unwrap_or_default(),
                None => self.handle.inputs().clone(),
            };
        }

        if !self.definition.has_incoming(node_id) {
            return self.handle.inputs().clone();
        }

        let mut inputs = HashMap::new();
        for conn in self.definition.connections.iter().filter(|c| &c.to_node == node_id) {
            let produced = self
                .definition
                .node_index(&conn.from_node)
                .and_then(|from| self.outputs.get(&from))
                .and_then(|outputs| outputs.get(&conn.from_port));
            if let Some(value) = produced {
                inputs.insert(conn.to_port.clone(), value.clone());
            }
        }
        inputs
    }

    /// Drive one node through its attempts until it completes, is skipped,
    /// or fails the run.
    async fn run_node(&mut self, idx: usize) -> Result<FlowControl, RunError> {
        let node = self.definition.nodes[idx].clone();
        let run_id = self.handle.id();

        let policy = node
            .error_policy(self.config.default_max_retries)
            .map_err(|e| RunError::Structural(e.to_string()))?;
        let timeout_ms = node
            .timeout_ms()
            .map_err(|e| RunError::Structural(e.to_string()))?
            .unwrap_or(self.config.node_timeout_ms);
        let retry_delay =
            Duration::from_millis(policy.retry_delay_ms.unwrap_or(self.config.retry_delay_ms));
        let executor = self.registry.get(&node.node_type);

        loop {
            if self.handle.is_cancelled() {
                return Err(RunError::Cancelled(format!(
                    "Run cancelled before node '{}'",
                    node.id
                )));
            }

            let attempt = self
                .handle
                .with_node(idx, |record| {
                    record.phase = NodePhase::Started;
                    record.attempts += 1;
                    record.attempts
                })
                .unwrap_or(1);

            self.events.emit(ExecutionEvent::NodeStarted {
                run_id,
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                attempt,
                timestamp: Utc::now(),
            });
            debug!("Run {} node {} attempt {} started", run_id, node.id, attempt);

            let started = Instant::now();
            let result = match &executor {
                Some(executor) => self.invoke(Arc::clone(executor), &node, idx, timeout_ms).await,
                None => Err(RunError::Structural(format!(
                    "Unknown node type '{}' for node '{}'",
                    node.node_type, node.id
                ))),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            self.events.emit(ExecutionEvent::NodeExecutionTime {
                run_id,
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                duration_ms,
                timestamp: Utc::now(),
            });

            let err = match result {
                Ok(output) => {
                    self.handle.with_node(idx, |record| {
                        record.phase = NodePhase::Completed;
                        record.last_duration_ms = Some(duration_ms);
                        record.error = None;
                    });
                    record_node_execution(&node.node_type, "completed");
                    self.events.emit(ExecutionEvent::NodeCompleted {
                        run_id,
                        node_id: node.id.clone(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    debug!("Run {} node {} completed in {}ms", run_id, node.id, duration_ms);

                    self.outputs.insert(idx, output.outputs);
                    return Ok(output.flow);
                }
                Err(err) => err,
            };

            record_node_execution(&node.node_type, "errored");

            let retries_used = self
                .handle
                .with_node(idx, |record| record.retries)
                .unwrap_or(0);
            let will_retry = !err.is_cancellation()
                && policy.on_error == OnError::Retry
                && err.is_retryable()
                && retries_used < policy.max_retries;

            self.handle.with_node(idx, |record| {
                record.phase = NodePhase::Errored;
                record.last_duration_ms = Some(duration_ms);
                record.error = Some(err.to_string());
                if will_retry {
                    record.retries += 1;
                }
            });

            self.events.emit(ExecutionEvent::NodeErrored {
                run_id,
                node_id: node.id.clone(),
                error: err.to_string(),
                error_kind: err.kind(),
                attempt,
                will_retry,
                timestamp: Utc::now(),
            });

            if err.is_cancellation() {
                return Err(err);
            }

            if will_retry {
                warn!(
                    "Run {} node {} attempt {} failed: {}. Retry {}/{} in {}ms",
                    run_id,
                    node.id,
                    attempt,
                    err,
                    retries_used + 1,
                    policy.max_retries,
                    retry_delay.as_millis()
                );
                self.pause(retry_delay).await;
                continue;
            }

            if policy.on_error == OnError::Skip {
                warn!("Run {} skipping failed node {}: {}", run_id, node.id, err);
                self.outputs.remove(&idx);
                return Ok(FlowControl::Continue);
            }

            return Err(err);
        }
    }

    /// Run the executor in its own task so a panic or a timeout surfaces as
    /// a node error instead of tearing down the walk.
    async fn invoke(
        &mut self,
        executor: Arc<dyn NodeExecutor>,
        node: &NodeInstance,
        idx: usize,
        timeout_ms: u64,
    ) -> Result<NodeOutput, RunError> {
        let cancellation = self.handle.cancellation().child_token();
        let ctx = NodeContext {
            run_id: self.handle.id(),
            workflow_id: self.definition.id,
            node: node.clone(),
            connections: self.definition.incident_connections(&node.id),
            inputs: self.collect_inputs(idx),
            memory: Arc::clone(self.memory.entry(idx).or_default()),
            events: self.events.create_emitter(self.handle.id(), node.id.clone()),
            cancellation: cancellation.clone(),
        };

        let mut task = tokio::spawn(async move { executor.execute(ctx).await });

        let joined = match timeout(Duration::from_millis(timeout_ms), &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                cancellation.cancel();
                task.abort();
                return Err(RunError::Timeout(format!(
                    "Node '{}' exceeded {}ms",
                    node.id, timeout_ms
                )));
            }
        };

        match joined {
            Ok(Ok(mut output)) => match output.failure.take() {
                Some(message) => Err(RunError::Execution(format!(
                    "Node '{}' failed: {}",
                    node.id, message
                ))),
                None => Ok(output),
            },
            Ok(Err(e)) => Err(RunError::from_node(&node.id, e)),
            Err(join_error) => Err(RunError::Execution(format!(
                "Node '{}' executor panicked: {}",
                node.id, join_error
            ))),
        }
    }

    /// Retry delay, cut short when the run is stopped.
    async fn pause(&self, delay: Duration) {
        tokio::select! {
            _ = sleep(delay) => {}
            _ = self.handle.cancellation().cancelled() => {}
        }
    }
}
