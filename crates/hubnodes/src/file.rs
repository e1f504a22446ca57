use crate::{decode_settings, settings};
use async_trait::async_trait;
use hubcore::settings::{FileReadSettings, FileWriteSettings};
use hubcore::{
    node_types, ExecutorMetadata, NodeConfig, NodeContext, NodeError, NodeExecutor, NodeOutput,
};
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Reads a UTF-8 file. The `path` input overrides the configured path.
pub struct FileReadNode;

#[async_trait]
impl NodeExecutor for FileReadNode {
    fn node_type(&self) -> &str {
        node_types::FILE_READ
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let FileReadSettings { path } = settings(&ctx)?;
        let path = ctx.string_input_or("path", path.as_deref())?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read {}: {}", path, e)))?;

        ctx.events.info(format!("Read {} bytes from {}", content.len(), path));

        Ok(NodeOutput::new()
            .with_output("content", content)
            .with_output("path", path))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        decode_settings::<FileReadSettings>(config).map(|_| ())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Read a file from disk", "file")
    }
}

/// Writes or appends to a file.
///
/// Content comes from the `content` input when wired, otherwise from config.
/// Non-string inputs are written as JSON.
pub struct FileWriteNode;

#[async_trait]
impl NodeExecutor for FileWriteNode {
    fn node_type(&self) -> &str {
        node_types::FILE_WRITE
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let FileWriteSettings {
            path,
            content,
            append,
        } = settings(&ctx)?;
        let path = ctx.string_input_or("path", path.as_deref())?;

        let content = match ctx.inputs.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => content.ok_or_else(|| NodeError::MissingInput("content".to_string()))?,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to open {}: {}", path, e)))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to write {}: {}", path, e)))?;
        file.flush()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to write {}: {}", path, e)))?;

        ctx.events.info(format!("Wrote {} bytes to {}", content.len(), path));

        Ok(NodeOutput::new()
            .with_output("path", path)
            .with_output("bytes", content.len()))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        decode_settings::<FileWriteSettings>(config).map(|_| ())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Write or append to a file", "file")
    }
}
