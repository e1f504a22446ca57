use crate::events::EventEmitter;
use crate::workflow::{Connection, NodeConfig, NodeInstance};
use crate::{NodeError, RunId, WorkflowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Category that marks an executor as steering the walk (branch, loop).
pub const CONTROL_CATEGORY: &str = "control";

/// Core trait that every node type implements
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Unique type identifier (e.g., "http.request", "shell.command")
    fn node_type(&self) -> &str;

    /// Execute one node invocation.
    ///
    /// Expected business failures may come back either as `Err` or as
    /// [`NodeOutput::failure`]; the engine treats both the same way.
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Validate configuration at submission time
    fn validate_config(&self, _config: &NodeConfig) -> Result<(), NodeError> {
        Ok(())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::default()
    }
}

/// Descriptive information about an executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorMetadata {
    pub description: String,
    pub category: String,
}

impl ExecutorMetadata {
    pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
        }
    }

    pub fn is_control_flow(&self) -> bool {
        self.category == CONTROL_CATEGORY
    }
}

impl Default for ExecutorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Execution context passed to each node invocation
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,

    pub node: NodeInstance,

    /// Connections entering or leaving this node
    pub connections: Vec<Connection>,

    /// Input values from connected nodes, keyed by input port
    pub inputs: HashMap<String, Value>,

    /// Run-scoped memory; survives revisits of this node within the same run
    pub memory: Arc<RwLock<NodeMemory>>,

    pub events: EventEmitter,

    /// Cancelled when the run is stopped or the attempt times out
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.node
            .config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Typed string input, falling back to a config value
    pub fn string_input_or(&self, name: &str, fallback: Option<&str>) -> Result<String, NodeError> {
        match self.inputs.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "string".to_string(),
                actual: json_type_name(other).to_string(),
            }),
            None => fallback
                .map(str::to_string)
                .ok_or_else(|| NodeError::MissingInput(name.to_string())),
        }
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Persistent state for a node within one run
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeMemory {
    pub data: HashMap<String, Value>,
}

/// How the walk proceeds after a node completes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ports", rename_all = "snake_case")]
pub enum FlowControl {
    /// Follow every outgoing edge (or the next node in a linear workflow)
    #[default]
    Continue,
    /// Follow only edges leaving these output ports
    Follow(Vec<String>),
    /// Do not advance from this node
    Halt,
}

/// Output from a node invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,

    #[serde(default)]
    pub flow: FlowControl,

    /// Structured failure; treated as an execution error
    #[serde(default)]
    pub failure: Option<String>,

    pub metadata: HashMap<String, Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            flow: FlowControl::Continue,
            failure: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_outputs(mut self, outputs: HashMap<String, Value>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn follow(mut self, port: impl Into<String>) -> Self {
        self.flow = FlowControl::Follow(vec![port.into()]);
        self
    }

    pub fn halt(mut self) -> Self {
        self.flow = FlowControl::Halt;
        self
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}
