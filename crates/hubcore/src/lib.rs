//! Core abstractions for runhub
//!
//! Workflow definitions, run snapshots, the executor contract, the error
//! taxonomy and the event bus. No scheduling logic lives here.

mod error;
pub mod events;
mod node;
mod run;
pub mod settings;
mod workflow;

pub use error::{ErrorKind, HubError, NodeError, RunError, WorkflowError};
pub use events::*;
pub use node::{
    json_type_name, ExecutorMetadata, FlowControl, NodeContext, NodeExecutor, NodeMemory,
    NodeOutput, CONTROL_CATEGORY,
};
pub use run::{HistoryEntry, NodePhase, NodeRecord, RunId, RunSnapshot, RunStatus};
pub use settings::{node_types, NodeSettings};
pub use workflow::{
    Connection, ErrorPolicy, NodeConfig, NodeId, NodeInstance, OnError, Position,
    WorkflowDefinition, WorkflowId,
};

/// Result type for runhub operations
pub type Result<T> = std::result::Result<T, HubError>;
