//! Standard node library
//!
//! Built-in executors for the node types every runhub installation ships
//! with. Anything else is a plugin registered by the embedding program.

mod control;
mod debug;
mod file;
mod flow;
mod http;
mod shell;
mod time;

pub use control::{evaluate, ConditionNode, LoopNode};
pub use debug::LogNode;
pub use file::{FileReadNode, FileWriteNode};
pub use flow::{EndNode, StartNode};
pub use http::HttpRequestNode;
pub use shell::ShellNode;
pub use time::DelayNode;

use hubcore::{HubError, NodeConfig, NodeContext, NodeError};
use hubruntime::ExecutorRegistry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &ExecutorRegistry) -> Result<(), HubError> {
    registry.register(Arc::new(StartNode))?;
    registry.register(Arc::new(EndNode))?;
    registry.register(Arc::new(LogNode))?;
    registry.register(Arc::new(DelayNode))?;
    registry.register(Arc::new(ShellNode))?;
    registry.register(Arc::new(HttpRequestNode::new()))?;
    registry.register(Arc::new(FileReadNode))?;
    registry.register(Arc::new(FileWriteNode))?;
    registry.register(Arc::new(ConditionNode))?;
    registry.register(Arc::new(LoopNode))?;
    Ok(())
}

/// A registry pre-populated with the standard nodes
pub fn standard_registry() -> Result<ExecutorRegistry, HubError> {
    let registry = ExecutorRegistry::new();
    register_all(&registry)?;
    Ok(registry)
}

/// Decode a node's config map into its typed settings
pub(crate) fn decode_settings<T: DeserializeOwned>(config: &NodeConfig) -> Result<T, NodeError> {
    let object: serde_json::Map<String, Value> = config
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::from_value(Value::Object(object))
        .map_err(|e| NodeError::Configuration(e.to_string()))
}

pub(crate) fn settings<T: DeserializeOwned>(ctx: &NodeContext) -> Result<T, NodeError> {
    decode_settings(&ctx.node.config)
}
