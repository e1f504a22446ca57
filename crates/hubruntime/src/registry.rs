use hubcore::{ExecutorMetadata, HubError, NodeExecutor};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of available node executors, keyed by node type.
///
/// The first registration of a type wins; later attempts are rejected so a
/// plugin cannot silently replace a built-in.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn NodeExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Register an executor under its own `node_type()`
    pub fn register(&self, executor: Arc<dyn NodeExecutor>) -> Result<(), HubError> {
        let node_type = executor.node_type().to_string();
        self.register_as(node_type, executor)
    }

    /// Register an executor under an explicit type name
    pub fn register_as(
        &self,
        node_type: impl Into<String>,
        executor: Arc<dyn NodeExecutor>,
    ) -> Result<(), HubError> {
        let node_type = node_type.into();
        let mut executors = self
            .executors
            .write()
            .map_err(|_| HubError::Config("executor registry lock poisoned".to_string()))?;

        if executors.contains_key(&node_type) {
            tracing::warn!("Rejecting duplicate registration for node type: {}", node_type);
            return Err(HubError::DuplicateExecutor(node_type));
        }

        tracing::info!("Registering node type: {}", node_type);
        executors.insert(node_type, executor);
        Ok(())
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors
            .read()
            .ok()
            .and_then(|executors| executors.get(node_type).cloned())
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.get(node_type).is_some()
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .executors
            .read()
            .map(|executors| executors.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<ExecutorMetadata> {
        self.get(node_type).map(|e| e.metadata())
    }

    pub fn len(&self) -> usize {
        self.executors.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
