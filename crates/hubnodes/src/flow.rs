use async_trait::async_trait;
use hubcore::{node_types, ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput};
use serde_json::Value;

/// Entry marker. Hands the run's inputs to whatever follows.
pub struct StartNode;

#[async_trait]
impl NodeExecutor for StartNode {
    fn node_type(&self) -> &str {
        node_types::START
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        // Downstream nodes wired to `output` receive the whole input map.
        let bundle: serde_json::Map<String, Value> = ctx
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut output = NodeOutput::new().with_outputs(ctx.inputs);
        output.outputs.entry("output".to_string()).or_insert(Value::Object(bundle));
        Ok(output)
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Marks where a workflow begins", "flow")
    }
}

/// Exit marker
pub struct EndNode;

#[async_trait]
impl NodeExecutor for EndNode {
    fn node_type(&self) -> &str {
        node_types::END
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.events.info("Workflow reached its end node");
        Ok(NodeOutput::new().with_outputs(ctx.inputs).halt())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Marks where a workflow ends", "flow")
    }
}
