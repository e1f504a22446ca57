use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Executor already registered for node type: {0}")]
    DuplicateExecutor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a node executor.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Problems with the shape of a workflow definition, detected at submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cycle through nodes without a control-flow node: {0}")]
    CyclicDependency(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Invalid configuration for node '{node}': {reason}")]
    InvalidConfig { node: String, reason: String },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}

/// Coarse classification of a run-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Structural,
    Execution,
    Cancellation,
    Timeout,
}

/// Failure of a node attempt or of a whole run.
///
/// `Execution` and `Timeout` go through the node's error policy.
/// `Cancelled` always aborts the run. `Structural` honors `skip` but
/// never retries, since a retry would hit the same condition.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum RunError {
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Cancellation error: {0}")]
    Cancelled(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Structural(_) => ErrorKind::Structural,
            RunError::Execution(_) => ErrorKind::Execution,
            RunError::Cancelled(_) => ErrorKind::Cancellation,
            RunError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RunError::Execution(_) | RunError::Timeout(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, RunError::Cancelled(_))
    }

    /// Wrap an executor failure, naming the node it came from.
    pub fn from_node(node_id: &str, err: NodeError) -> Self {
        match err {
            NodeError::Timeout { millis } => {
                RunError::Timeout(format!("Node '{}' exceeded {}ms", node_id, millis))
            }
            NodeError::Cancelled => {
                RunError::Cancelled(format!("Node '{}' was cancelled", node_id))
            }
            other => RunError::Execution(format!("Node '{}' failed: {}", node_id, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_errors_map_onto_run_taxonomy() {
        let timeout = RunError::from_node("fetch", NodeError::Timeout { millis: 50 });
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(timeout.is_retryable());

        let cancelled = RunError::from_node("fetch", NodeError::Cancelled);
        assert!(cancelled.is_cancellation());
        assert!(!cancelled.is_retryable());

        let failed = RunError::from_node("fetch", NodeError::ExecutionFailed("boom".into()));
        assert_eq!(failed.kind(), ErrorKind::Execution);
        assert_eq!(
            failed.to_string(),
            "Execution error: Node 'fetch' failed: Execution failed: boom"
        );
    }

    #[test]
    fn workflow_errors_lift_into_hub_errors() {
        fn admit() -> Result<(), HubError> {
            Err(WorkflowError::DuplicateNode("a".into()))?
        }
        assert!(matches!(
            admit(),
            Err(HubError::Workflow(WorkflowError::DuplicateNode(id))) if id == "a"
        ));
    }

    #[test]
    fn structural_errors_are_not_retryable() {
        let err = RunError::Structural("Unknown node type: ocr.read".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Structural);
    }
}
