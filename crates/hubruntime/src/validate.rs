use crate::registry::ExecutorRegistry;
use hubcore::{WorkflowDefinition, WorkflowError};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Check a definition before it is admitted.
///
/// Unknown node types pass: they surface later as structural node errors so
/// the node's error policy still applies to them.
pub fn validate_definition(
    workflow: &WorkflowDefinition,
    registry: &ExecutorRegistry,
    default_max_retries: u32,
) -> Result<(), WorkflowError> {
    if workflow.name.trim().is_empty() {
        return Err(WorkflowError::Invalid("workflow name is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if node.id.is_empty() {
            return Err(WorkflowError::Invalid("node id is empty".to_string()));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(WorkflowError::DuplicateNode(node.id.clone()));
        }

        node.error_policy(default_max_retries)?;
        node.timeout_ms()?;
        node.settings()?;

        if let Some(executor) = registry.get(&node.node_type) {
            executor
                .validate_config(&node.config)
                .map_err(|e| WorkflowError::InvalidConfig {
                    node: node.id.clone(),
                    reason: e.to_string(),
                })?;
        }
    }

    let graph = build_graph(workflow)?;
    check_cycles(workflow, &graph, registry)
}

fn build_graph(workflow: &WorkflowDefinition) -> Result<DiGraph<usize, ()>, WorkflowError> {
    let mut graph = DiGraph::new();
    let mut node_to_index = HashMap::new();

    for (position, node) in workflow.nodes.iter().enumerate() {
        let idx = graph.add_node(position);
        node_to_index.insert(node.id.as_str(), idx);
    }

    for conn in &workflow.connections {
        let from_idx = node_to_index.get(conn.from_node.as_str()).ok_or_else(|| {
            WorkflowError::InvalidConnection(format!("unknown source node '{}'", conn.from_node))
        })?;
        let to_idx = node_to_index.get(conn.to_node.as_str()).ok_or_else(|| {
            WorkflowError::InvalidConnection(format!("unknown target node '{}'", conn.to_node))
        })?;

        graph.add_edge(*from_idx, *to_idx, ());
    }

    Ok(graph)
}

/// Cycles are loops only when something in them can decide to leave.
fn check_cycles(
    workflow: &WorkflowDefinition,
    graph: &DiGraph<usize, ()>,
    registry: &ExecutorRegistry,
) -> Result<(), WorkflowError> {
    for component in tarjan_scc(graph) {
        let is_cycle = component.len() > 1 || is_self_loop(graph, component[0]);
        if !is_cycle {
            continue;
        }

        let steerable = component.iter().any(|idx| {
            let node = &workflow.nodes[graph[*idx]];
            match registry.get_metadata(&node.node_type) {
                Some(metadata) => metadata.is_control_flow(),
                None => true,
            }
        });

        if !steerable {
            let mut members: Vec<&str> = component
                .iter()
                .map(|idx| workflow.nodes[graph[*idx]].id.as_str())
                .collect();
            members.sort_unstable();
            return Err(WorkflowError::CyclicDependency(members.join(", ")));
        }
    }

    Ok(())
}

/// Which nodes sit on a cycle. Edges leaving such nodes may fire repeatedly,
/// so the walker does not wait on them.
pub(crate) fn cyclic_nodes(workflow: &WorkflowDefinition) -> Vec<bool> {
    let mut cyclic = vec![false; workflow.nodes.len()];
    let Ok(graph) = build_graph(workflow) else {
        return cyclic;
    };

    for component in tarjan_scc(&graph) {
        if component.len() > 1 || is_self_loop(&graph, component[0]) {
            for idx in component {
                cyclic[graph[idx]] = true;
            }
        }
    }
    cyclic
}

fn is_self_loop(graph: &DiGraph<usize, ()>, idx: NodeIndex) -> bool {
    graph.contains_edge(idx, idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hubcore::{
        ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInstance, NodeOutput,
        CONTROL_CATEGORY,
    };
    use std::sync::Arc;

    struct Plain(&'static str, &'static str);

    #[async_trait]
    impl NodeExecutor for Plain {
        fn node_type(&self) -> &str {
            self.0
        }

        async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::new())
        }

        fn validate_config(&self, config: &hubcore::NodeConfig) -> Result<(), NodeError> {
            if config.contains_key("forbidden") {
                return Err(NodeError::Configuration("forbidden key".into()));
            }
            Ok(())
        }

        fn metadata(&self) -> ExecutorMetadata {
            ExecutorMetadata::new("", self.1)
        }
    }

    fn registry() -> ExecutorRegistry {
        let registry = ExecutorRegistry::new();
        registry.register(Arc::new(Plain("step", "general"))).unwrap();
        registry
            .register(Arc::new(Plain("repeat", CONTROL_CATEGORY)))
            .unwrap();
        registry
    }

    #[test]
    fn rejects_duplicate_ids_and_dangling_edges() {
        let wf = WorkflowDefinition::new("dup")
            .with_node(NodeInstance::new("a", "step"))
            .with_node(NodeInstance::new("a", "step"));
        assert_eq!(
            validate_definition(&wf, &registry(), 3),
            Err(WorkflowError::DuplicateNode("a".into()))
        );

        let mut wf = WorkflowDefinition::new("dangling").with_node(NodeInstance::new("a", "step"));
        wf.connect("a", "output", "ghost", "input");
        assert!(matches!(
            validate_definition(&wf, &registry(), 3),
            Err(WorkflowError::InvalidConnection(_))
        ));
    }

    #[test]
    fn cycles_need_a_control_flow_node() {
        let mut wf = WorkflowDefinition::new("spin")
            .with_node(NodeInstance::new("a", "step"))
            .with_node(NodeInstance::new("b", "step"));
        wf.connect("a", "output", "b", "input");
        wf.connect("b", "output", "a", "input");
        assert_eq!(
            validate_definition(&wf, &registry(), 3),
            Err(WorkflowError::CyclicDependency("a, b".into()))
        );

        let mut wf = WorkflowDefinition::new("loop")
            .with_node(NodeInstance::new("a", "repeat"))
            .with_node(NodeInstance::new("b", "step"));
        wf.connect("a", "body", "b", "input");
        wf.connect("b", "output", "a", "input");
        assert_eq!(validate_definition(&wf, &registry(), 3), Ok(()));
    }

    #[test]
    fn unknown_types_pass_but_plugin_config_is_checked() {
        let wf = WorkflowDefinition::new("plugin").with_node(NodeInstance::new("a", "ocr.read"));
        assert_eq!(validate_definition(&wf, &registry(), 3), Ok(()));

        let wf = WorkflowDefinition::new("bad")
            .with_node(NodeInstance::new("a", "step").with_config("forbidden", true));
        assert!(matches!(
            validate_definition(&wf, &registry(), 3),
            Err(WorkflowError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn only_nodes_on_a_cycle_are_cyclic() {
        let mut wf = WorkflowDefinition::new("mixed")
            .with_node(NodeInstance::new("entry", "step"))
            .with_node(NodeInstance::new("loop", "repeat"))
            .with_node(NodeInstance::new("body", "step"))
            .with_node(NodeInstance::new("exit", "step"))
            .with_node(NodeInstance::new("spin", "repeat"));
        wf.connect("entry", "output", "loop", "input");
        wf.connect("loop", "body", "body", "input");
        wf.connect("body", "output", "loop", "input");
        wf.connect("loop", "done", "exit", "input");
        wf.connect("spin", "body", "spin", "input");

        assert_eq!(cyclic_nodes(&wf), vec![false, true, true, false, true]);
    }

    #[test]
    fn malformed_builtin_settings_are_rejected() {
        let wf = WorkflowDefinition::new("loop")
            .with_node(NodeInstance::new("a", hubcore::node_types::LOOP));
        assert!(matches!(
            validate_definition(&wf, &registry(), 3),
            Err(WorkflowError::InvalidConfig { .. })
        ));
    }
}
