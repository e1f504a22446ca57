use crate::settings::NodeSettings;
use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = String;

/// Free-form node configuration as written by the editor.
pub type NodeConfig = HashMap<String, Value>;

/// Complete workflow definition, immutable once submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeInstance) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Builder form of [`add_node`](Self::add_node).
    pub fn with_node(mut self, node: NodeInstance) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn connect(
        &mut self,
        from_node: impl Into<NodeId>,
        from_port: impl Into<String>,
        to_node: impl Into<NodeId>,
        to_port: impl Into<String>,
    ) {
        self.connections.push(Connection {
            from_node: from_node.into(),
            from_port: from_port.into(),
            to_node: to_node.into(),
            to_port: to_port.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Connections touching the node, in either direction.
    pub fn incident_connections(&self, id: &str) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.from_node == id || c.to_node == id)
            .cloned()
            .collect()
    }

    pub fn has_incoming(&self, id: &str) -> bool {
        self.connections.iter().any(|c| c.to_node == id)
    }
}

/// One node placed in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: NodeConfig,
    #[serde(default)]
    pub position: Option<Position>,
}

impl NodeInstance {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            config: HashMap::new(),
            position: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn on_error(self, policy: OnError) -> Self {
        self.with_config("onError", policy.as_str())
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        self.with_config("maxRetries", max_retries)
    }

    /// Decode the typed settings for this node's type.
    pub fn settings(&self) -> Result<NodeSettings, WorkflowError> {
        NodeSettings::parse(&self.node_type, &self.config).map_err(|reason| {
            WorkflowError::InvalidConfig {
                node: self.id.clone(),
                reason,
            }
        })
    }

    /// Resolve `onError` / `maxRetries` / `retryDelayMs`.
    pub fn error_policy(&self, default_max_retries: u32) -> Result<ErrorPolicy, WorkflowError> {
        let on_error = match self.config.get("onError") {
            None | Some(Value::Null) => OnError::Stop,
            Some(Value::String(s)) => OnError::parse(s).ok_or_else(|| self.invalid(format!(
                "onError must be one of stop, skip, retry (got '{}')",
                s
            )))?,
            Some(other) => return Err(self.invalid(format!("onError must be a string, got {}", other))),
        };

        let max_retries = match self.config.get("maxRetries") {
            None | Some(Value::Null) => default_max_retries,
            Some(v) => v
                .as_u64()
                .map(|n| n.min(u32::MAX as u64) as u32)
                .ok_or_else(|| self.invalid(format!("maxRetries must be a non-negative integer, got {}", v)))?,
        };

        let retry_delay_ms = self.optional_millis("retryDelayMs")?;

        Ok(ErrorPolicy {
            on_error,
            max_retries,
            retry_delay_ms,
        })
    }

    /// Per-node execution timeout override.
    pub fn timeout_ms(&self) -> Result<Option<u64>, WorkflowError> {
        self.optional_millis("timeoutMs")
    }

    fn optional_millis(&self, key: &str) -> Result<Option<u64>, WorkflowError> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("{} must be a non-negative integer, got {}", key, v))),
        }
    }

    fn invalid(&self, reason: String) -> WorkflowError {
        WorkflowError::InvalidConfig {
            node: self.id.clone(),
            reason,
        }
    }
}

/// Edge between an output port and an input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeId,
    #[serde(default = "default_output_port")]
    pub from_port: String,
    pub to_node: NodeId,
    #[serde(default = "default_input_port")]
    pub to_port: String,
}

fn default_output_port() -> String {
    "output".to_string()
}

fn default_input_port() -> String {
    "input".to_string()
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// What to do when a node attempt fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Stop,
    Skip,
    Retry,
}

impl OnError {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stop" => Some(OnError::Stop),
            "skip" => Some(OnError::Skip),
            "retry" => Some(OnError::Retry),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnError::Stop => "stop",
            OnError::Skip => "skip",
            OnError::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    pub on_error: OnError,
    pub max_retries: u32,
    pub retry_delay_ms: Option<u64>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            on_error: OnError::Stop,
            max_retries: 3,
            retry_delay_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_policy_defaults_to_stop() {
        let node = NodeInstance::new("a", "debug.log");
        let policy = node.error_policy(3).unwrap();
        assert_eq!(policy.on_error, OnError::Stop);
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn error_policy_reads_editor_keys() {
        let node = NodeInstance::new("a", "http.request")
            .with_config("onError", "Retry")
            .with_config("maxRetries", 2)
            .with_config("retryDelayMs", 10);
        let policy = node.error_policy(3).unwrap();
        assert_eq!(policy.on_error, OnError::Retry);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.retry_delay_ms, Some(10));
    }

    #[test]
    fn malformed_policy_is_rejected() {
        let node = NodeInstance::new("a", "x").with_config("onError", "explode");
        assert!(matches!(
            node.error_policy(3),
            Err(WorkflowError::InvalidConfig { .. })
        ));

        let node = NodeInstance::new("a", "x").with_config("maxRetries", -1);
        assert!(node.error_policy(3).is_err());
    }

    #[test]
    fn definition_deserializes_from_editor_json() {
        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "name": "greet",
            "nodes": [
                {"id": "start", "type": "flow.start"},
                {"id": "end", "type": "flow.end", "config": {"onError": "skip"}}
            ],
            "connections": [{"from_node": "start", "to_node": "end"}]
        }))
        .unwrap();

        assert_eq!(wf.nodes.len(), 2);
        assert_eq!(wf.connections[0].from_port, "output");
        assert_eq!(wf.connections[0].to_port, "input");
        assert!(wf.has_incoming("end"));
        assert_eq!(wf.incident_connections("start").len(), 1);
    }
}
