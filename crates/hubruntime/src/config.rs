use hubcore::HubError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admission cap: runs executing at the same time
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
    /// Per-node timeout unless the node sets `timeoutMs`
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,
    /// Delay between retry attempts unless the node sets `retryDelayMs`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Ceiling on node invocations per run; guards runaway loops
    #[serde(default = "default_max_node_executions")]
    pub max_node_executions: usize,
}

fn default_max_concurrent_runs() -> usize {
    5
}

fn default_max_history_size() -> usize {
    100
}

fn default_event_buffer_size() -> usize {
    1000
}

fn default_node_timeout_ms() -> u64 {
    30_000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_node_executions() -> usize {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            max_history_size: default_max_history_size(),
            event_buffer_size: default_event_buffer_size(),
            node_timeout_ms: default_node_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            default_max_retries: default_max_retries(),
            max_node_executions: default_max_node_executions(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, HubError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| HubError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, HubError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), HubError> {
        if self.max_concurrent_runs == 0 {
            return Err(HubError::Config(
                "max_concurrent_runs must be at least 1".to_string(),
            ));
        }
        if self.max_history_size == 0 {
            return Err(HubError::Config(
                "max_history_size must be at least 1".to_string(),
            ));
        }
        if self.max_node_executions == 0 {
            return Err(HubError::Config(
                "max_node_executions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_concurrent_runs(mut self, cap: usize) -> Self {
        self.max_concurrent_runs = cap;
        self
    }

    pub fn with_max_history_size(mut self, size: usize) -> Self {
        self.max_history_size = size;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_node_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.node_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_node_executions(mut self, limit: usize) -> Self {
        self.max_node_executions = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("max_concurrent_runs = 2\n").unwrap();
        assert_eq!(config.max_concurrent_runs, 2);
        assert_eq!(config.max_history_size, 100);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn zero_cap_is_rejected() {
        let err = EngineConfig::from_toml_str("max_concurrent_runs = 0").unwrap_err();
        assert!(matches!(err, HubError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"max_history_size = 7\nnode_timeout_ms = 250\n")
            .expect("write toml");

        let config = EngineConfig::load(tmp.path()).expect("load config");
        assert_eq!(config.max_history_size, 7);
        assert_eq!(config.node_timeout_ms, 250);
    }
}
