use crate::{decode_settings, settings};
use async_trait::async_trait;
use hubcore::settings::ShellSettings;
use hubcore::{
    node_types, ExecutorMetadata, NodeConfig, NodeContext, NodeError, NodeExecutor, NodeOutput,
};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs a local command.
///
/// The child is killed if the node is cancelled or times out. A non-zero
/// exit is returned as a failed output carrying stdout, stderr and the exit
/// code, so the node's error policy decides what happens next.
pub struct ShellNode;

#[async_trait]
impl NodeExecutor for ShellNode {
    fn node_type(&self) -> &str {
        node_types::SHELL
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let ShellSettings {
            command,
            mut args,
            cwd,
            env,
        } = settings(&ctx)?;

        // Extra arguments may be wired in from upstream nodes.
        if let Some(Value::Array(extra)) = ctx.inputs.get("args") {
            args.extend(extra.iter().map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }));
        }

        ctx.events.info(format!("$ {} {}", command, args.join(" ")));
        debug!("Run {} node {} spawning '{}'", ctx.run_id, ctx.node_id(), command);

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            NodeError::ExecutionFailed(format!("Failed to start '{}': {}", command, e))
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            result = child.wait_with_output() => result.map_err(|e| {
                NodeError::ExecutionFailed(format!("Failed to wait for '{}': {}", command, e))
            })?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        let result = if output.status.success() {
            NodeOutput::new()
        } else {
            let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            ctx.events.warn(format!("'{}' exited with {}", command, code));
            NodeOutput::failure(format!(
                "'{}' exited with code {}: {}",
                command,
                code,
                stderr.trim()
            ))
        };

        Ok(result
            .with_output("stdout", stdout)
            .with_output("stderr", stderr)
            .with_output("exitCode", exit_code))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        let settings: ShellSettings = decode_settings(config)?;
        if settings.command.trim().is_empty() {
            return Err(NodeError::Configuration("command is empty".to_string()));
        }
        Ok(())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Run a local command", "system")
    }
}
