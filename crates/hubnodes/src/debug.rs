use crate::{decode_settings, settings};
use async_trait::async_trait;
use hubcore::settings::LogSettings;
use hubcore::{
    node_types, ExecutorMetadata, NodeConfig, NodeContext, NodeError, NodeExecutor, NodeOutput,
};
use tracing::info;

/// Logs a message and its inputs
pub struct LogNode;

#[async_trait]
impl NodeExecutor for LogNode {
    fn node_type(&self) -> &str {
        node_types::LOG
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let configured: LogSettings = settings(&ctx)?;
        let fallback = configured.message.as_deref().unwrap_or("(no message)");
        let message = ctx.string_input_or("message", Some(fallback))?;

        info!("[{}] {}: {}", ctx.run_id, ctx.node_id(), message);
        ctx.events.info(format!("DEBUG: {}", message));

        // Also log all inputs for visibility
        for (key, value) in &ctx.inputs {
            ctx.events.info(format!("  {}: {}", key, value));
        }

        Ok(NodeOutput::new()
            .with_outputs(ctx.inputs.clone())
            .with_output("message", message))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        decode_settings::<LogSettings>(config).map(|_| ())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Logs input values for debugging", "debug")
    }
}
