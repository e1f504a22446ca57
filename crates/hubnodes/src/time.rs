use crate::{decode_settings, settings};
use async_trait::async_trait;
use hubcore::settings::DelaySettings;
use hubcore::{
    node_types, ExecutorMetadata, NodeConfig, NodeContext, NodeError, NodeExecutor, NodeOutput,
};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        node_types::DELAY
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let DelaySettings { delay_ms } = settings(&ctx)?;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        // Pass through any inputs
        Ok(NodeOutput::new().with_outputs(ctx.inputs))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        decode_settings::<DelaySettings>(config).map(|_| ())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Delay execution for specified milliseconds", "time")
    }
}
