// crates/hubcli/src/main.rs

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use hubcore::{
    node_types, ExecutionEvent, NodeEvent, NodeInstance, OnError, RunStatus, WorkflowDefinition,
};
use hubruntime::{validate_definition, Engine, EngineConfig};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runhub")]
#[command(about = "Runhub workflow CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Engine config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_workflow(file, input, config.as_deref()).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes()?;
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let workflow_json = std::fs::read_to_string(file)?;
    Ok(serde_json::from_str(&workflow_json)?)
}

fn parse_inputs(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input_str) = input else {
        return Ok(HashMap::new());
    };

    match serde_json::from_str(&input_str)? {
        Value::Object(obj) => Ok(obj.into_iter().collect()),
        _ => bail!("Input must be a JSON object"),
    }
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunQueued { position, .. } => {
            println!("⏳ Run queued at position {}", position);
        }
        ExecutionEvent::RunStarted { .. } => {
            println!("▶️  Run started");
        }
        ExecutionEvent::NodeStarted {
            node_id,
            node_type,
            attempt,
            ..
        } => {
            if *attempt > 1 {
                println!("  🔁 Retrying node: {} ({}), attempt {}", node_id, node_type, attempt);
            } else {
                println!("  ⚡ Starting node: {} ({})", node_id, node_type);
            }
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeErrored {
            node_id,
            error,
            will_retry,
            ..
        } => {
            let suffix = if *will_retry { " (will retry)" } else { "" };
            println!("  ❌ Node {} failed: {}{}", node_id, error, suffix);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {:.0}% - {}", node_id, percent, msg);
                } else {
                    println!("     📊 [{}] {:.0}%", node_id, percent);
                }
            }
            NodeEvent::Data { .. } => {}
        },
        ExecutionEvent::RunCompleted { duration_ms, .. } => {
            println!("✨ Workflow completed successfully in {}ms", duration_ms);
        }
        ExecutionEvent::RunFailed {
            error, duration_ms, ..
        } => {
            println!("💥 Workflow failed after {}ms: {}", duration_ms, error);
        }
        ExecutionEvent::RunStopped { duration_ms, .. } => {
            println!("🛑 Workflow stopped after {}ms", duration_ms);
        }
        ExecutionEvent::NodeExecutionTime { .. } => {}
    }
}

async fn run_workflow(file: PathBuf, input: Option<String>, config: Option<&Path>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(&file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let inputs = parse_inputs(input)?;
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let registry = hubnodes::standard_registry()?;
    let engine = Engine::with_registry(Arc::new(registry), config);

    // Subscribe before submitting so no event is missed
    let mut events = engine.subscribe();
    let run_id = engine.submit_with_inputs(workflow, inputs)?;

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.run_id() != run_id {
                continue;
            }
            print_event(&event);
            if event.is_terminal() {
                break;
            }
        }
    });

    let snapshot = tokio::select! {
        snapshot = engine.wait(run_id) => snapshot,
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("Interrupted, stopping run {}", run_id);
            engine.stop(run_id);
            engine.wait(run_id).await
        }
    };

    // Let the printer catch up with the terminal event
    if tokio::time::timeout(Duration::from_secs(1), event_task).await.is_err() {
        tracing::debug!("event printer did not reach the terminal event");
    }

    let Some(snapshot) = snapshot else {
        bail!("Run {} disappeared before finishing", run_id);
    };

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", snapshot.id);
    println!("   Status: {}", snapshot.status);
    if let Some(duration) = snapshot.duration_ms {
        println!("   Duration: {}ms", duration);
    }
    for node in &snapshot.nodes {
        let retries = if node.retries > 0 {
            format!(", {} retries", node.retries)
        } else {
            String::new()
        };
        println!(
            "   {} ({}): {:?}, {} attempts{}",
            node.node_id, node.node_type, node.phase, node.attempts, retries
        );
    }

    if snapshot.status != RunStatus::Completed {
        bail!(
            "Run {} {}: {}",
            snapshot.id,
            snapshot.status,
            snapshot.error.unwrap_or_default()
        );
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(&file)?;
    let registry = hubnodes::standard_registry()?;
    let defaults = EngineConfig::default();
    validate_definition(&workflow, &registry, defaults.default_max_retries)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());

    let unknown: Vec<&str> = workflow
        .nodes
        .iter()
        .filter(|n| !registry.contains(&n.node_type))
        .map(|n| n.node_type.as_str())
        .collect();
    if !unknown.is_empty() {
        println!("⚠️  Node types not built in: {}", unknown.join(", "));
    }

    Ok(())
}

fn list_nodes() -> Result<()> {
    println!("📦 Available Node Types:");
    println!();

    let registry = hubnodes::standard_registry()?;

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }

    Ok(())
}

fn example_workflow() -> WorkflowDefinition {
    let mut workflow = WorkflowDefinition::new("Example HTTP Workflow");
    workflow.description = Some("Fetches data from an API and logs the result".to_string());

    workflow.add_node(
        NodeInstance::new("start", node_types::START)
            .with_name("Start")
            .with_position(0.0, 100.0),
    );
    workflow.add_node(
        NodeInstance::new("fetch", node_types::HTTP)
            .with_name("Fetch Data")
            .with_config("method", "GET")
            .with_config("retryDelayMs", 500)
            .on_error(OnError::Retry)
            .with_max_retries(2)
            .with_position(150.0, 100.0),
    );
    workflow.add_node(
        NodeInstance::new("log", node_types::LOG)
            .with_name("Log Response")
            .with_position(300.0, 100.0),
    );
    workflow.add_node(
        NodeInstance::new("end", node_types::END)
            .with_name("End")
            .with_position(450.0, 100.0),
    );

    workflow.connect("start", "url", "fetch", "url");
    workflow.connect("fetch", "body", "log", "message");
    workflow.connect("log", "message", "end", "input");
    workflow
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let workflow = example_workflow();

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  runhub run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_workflow_passes_validation() {
        let registry = hubnodes::standard_registry().unwrap();
        assert!(validate_definition(&example_workflow(), &registry, 3).is_ok());
    }

    #[test]
    fn inputs_must_be_an_object() {
        assert!(parse_inputs(Some("[1, 2]".to_string())).is_err());
        let inputs = parse_inputs(Some(r#"{"url": "http://localhost"}"#.to_string())).unwrap();
        assert_eq!(inputs["url"], Value::String("http://localhost".to_string()));
        assert!(parse_inputs(None).unwrap().is_empty());
    }
}
