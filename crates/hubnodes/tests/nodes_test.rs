// crates/hubnodes/tests/nodes_test.rs

use hubcore::{
    node_types, EventBus, FlowControl, NodeContext, NodeError, NodeExecutor, NodeInstance,
    NodeMemory, NodePhase, RunStatus, WorkflowDefinition,
};
use hubnodes::{
    standard_registry, ConditionNode, DelayNode, FileReadNode, FileWriteNode, LoopNode, ShellNode,
};
use hubruntime::{Engine, EngineConfig};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

// Helper function to create a test context
fn create_test_context(node: NodeInstance, inputs: HashMap<String, Value>) -> NodeContext {
    let event_bus = EventBus::new(100);
    let run_id = uuid::Uuid::new_v4();

    NodeContext {
        run_id,
        workflow_id: uuid::Uuid::new_v4(),
        events: event_bus.create_emitter(run_id, node.id.clone()),
        node,
        connections: Vec::new(),
        inputs,
        memory: Arc::new(RwLock::new(NodeMemory::default())),
        cancellation: CancellationToken::new(),
    }
}

fn engine() -> Engine {
    let registry = standard_registry().expect("standard nodes register once");
    Engine::with_registry(Arc::new(registry), EngineConfig::default())
}

async fn run_to_end(engine: &Engine, wf: WorkflowDefinition) -> hubcore::RunSnapshot {
    let run_id = engine.submit(wf).expect("workflow should be admitted");
    tokio::time::timeout(Duration::from_secs(10), engine.wait(run_id))
        .await
        .expect("run should finish")
        .expect("run should be known")
}

#[test]
fn standard_registry_lists_every_builtin() {
    let registry = standard_registry().unwrap();
    for node_type in [
        node_types::START,
        node_types::END,
        node_types::LOG,
        node_types::DELAY,
        node_types::SHELL,
        node_types::HTTP,
        node_types::FILE_READ,
        node_types::FILE_WRITE,
        node_types::CONDITION,
        node_types::LOOP,
    ] {
        assert!(registry.contains(node_type), "missing {}", node_type);
    }
    assert!(hubnodes::register_all(&registry).is_err());
}

#[tokio::test]
async fn test_shell_captures_stdout() {
    let node = NodeInstance::new("echo", node_types::SHELL)
        .with_config("command", "echo")
        .with_config("args", json!(["hello", "runhub"]));

    let output = ShellNode
        .execute(create_test_context(node, HashMap::new()))
        .await
        .expect("echo should run");

    assert!(!output.is_failure());
    assert_eq!(output.outputs["stdout"], json!("hello runhub\n"));
    assert_eq!(output.outputs["exitCode"], json!(0));
}

#[tokio::test]
async fn test_shell_nonzero_exit_is_a_failed_output() {
    let node = NodeInstance::new("fail", node_types::SHELL)
        .with_config("command", "sh")
        .with_config("args", json!(["-c", "echo oops >&2; exit 3"]));

    let output = ShellNode
        .execute(create_test_context(node, HashMap::new()))
        .await
        .expect("a failing command is still a result");

    assert!(output.is_failure());
    assert!(output.failure.as_deref().unwrap().contains("code 3"));
    assert_eq!(output.outputs["exitCode"], json!(3));
    assert_eq!(output.outputs["stderr"], json!("oops\n"));
}

#[tokio::test]
async fn test_shell_cancellation_kills_the_child() {
    let node = NodeInstance::new("sleep", node_types::SHELL)
        .with_config("command", "sleep")
        .with_config("args", json!(["30"]));
    let ctx = create_test_context(node, HashMap::new());
    let token = ctx.cancellation.clone();

    let task = tokio::spawn(async move { ShellNode.execute(ctx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancelled command should return promptly")
        .unwrap();
    assert!(matches!(result, Err(NodeError::Cancelled)));
}

#[tokio::test]
async fn test_delay_stops_when_cancelled() {
    let node = NodeInstance::new("wait", node_types::DELAY).with_config("delayMs", 60_000);
    let ctx = create_test_context(node, HashMap::new());
    ctx.cancellation.cancel();

    let result = DelayNode.execute(ctx).await;
    assert!(matches!(result, Err(NodeError::Cancelled)));
}

#[tokio::test]
async fn test_file_write_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    let path_str = path.to_str().unwrap().to_string();

    let write = NodeInstance::new("write", node_types::FILE_WRITE)
        .with_config("path", path_str.clone())
        .with_config("content", "first line\n");
    FileWriteNode
        .execute(create_test_context(write, HashMap::new()))
        .await
        .unwrap();

    let append = NodeInstance::new("append", node_types::FILE_WRITE)
        .with_config("path", path_str.clone())
        .with_config("append", true);
    let inputs = HashMap::from([("content".to_string(), json!({"n": 2}))]);
    FileWriteNode
        .execute(create_test_context(append, inputs))
        .await
        .unwrap();

    let read = NodeInstance::new("read", node_types::FILE_READ).with_config("path", path_str);
    let output = FileReadNode
        .execute(create_test_context(read, HashMap::new()))
        .await
        .unwrap();

    assert_eq!(output.outputs["content"], json!("first line\n{\"n\":2}"));
}

#[tokio::test]
async fn test_file_read_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let node = NodeInstance::new("read", node_types::FILE_READ)
        .with_config("path", dir.path().join("absent").to_str().unwrap());

    let result = FileReadNode
        .execute(create_test_context(node, HashMap::new()))
        .await;
    assert!(matches!(result, Err(NodeError::ExecutionFailed(_))));
}

#[tokio::test]
async fn test_condition_picks_a_port() {
    let node = NodeInstance::new("check", node_types::CONDITION)
        .with_config("operator", "gt")
        .with_config("right", 10);
    let inputs = HashMap::from([("left".to_string(), json!(42))]);

    let output = ConditionNode
        .execute(create_test_context(node, inputs))
        .await
        .unwrap();

    assert_eq!(output.flow, FlowControl::Follow(vec!["true".to_string()]));
    assert_eq!(output.outputs["result"], json!(true));
}

#[tokio::test]
async fn test_loop_counts_in_node_memory() {
    let node = NodeInstance::new("loop", node_types::LOOP).with_config("iterations", 2);
    let memory = Arc::new(RwLock::new(NodeMemory::default()));

    let mut ports = Vec::new();
    for _ in 0..4 {
        let mut ctx = create_test_context(node.clone(), HashMap::new());
        ctx.memory = Arc::clone(&memory);
        match LoopNode.execute(ctx).await.unwrap().flow {
            FlowControl::Follow(p) => ports.extend(p),
            other => panic!("unexpected flow {:?}", other),
        }
    }

    assert_eq!(ports, vec!["body", "body", "done", "body"]);
}

#[tokio::test]
async fn test_loop_workflow_runs_body_n_times() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("loop.log");

    let mut wf = WorkflowDefinition::new("loop")
        .with_node(NodeInstance::new("start", node_types::START))
        .with_node(NodeInstance::new("loop", node_types::LOOP).with_config("iterations", 3))
        .with_node(
            NodeInstance::new("body", node_types::FILE_WRITE)
                .with_config("path", log.to_str().unwrap())
                .with_config("content", "tick\n")
                .with_config("append", true),
        )
        .with_node(NodeInstance::new("end", node_types::END));
    wf.connect("start", "output", "loop", "input");
    wf.connect("loop", "body", "body", "input");
    wf.connect("body", "path", "loop", "input");
    wf.connect("loop", "done", "end", "input");

    let snapshot = run_to_end(&engine(), wf).await;

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "tick\ntick\ntick\n");
    assert_eq!(snapshot.node("loop").unwrap().attempts, 4);
    assert_eq!(snapshot.node("end").unwrap().phase, NodePhase::Completed);
}

#[tokio::test]
async fn test_condition_workflow_skips_the_other_branch() {
    let mut wf = WorkflowDefinition::new("branch")
        .with_node(NodeInstance::new("start", node_types::START))
        .with_node(
            NodeInstance::new("check", node_types::CONDITION)
                .with_config("left", "prod")
                .with_config("right", "prod"),
        )
        .with_node(NodeInstance::new("deploy", node_types::LOG).with_config("message", "deploying"))
        .with_node(
            NodeInstance::new("abort", node_types::SHELL)
                .with_config("command", "sh")
                .with_config("args", json!(["-c", "exit 1"])),
        );
    wf.connect("start", "output", "check", "input");
    wf.connect("check", "true", "deploy", "input");
    wf.connect("check", "false", "abort", "input");

    let snapshot = run_to_end(&engine(), wf).await;

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.node("deploy").unwrap().phase, NodePhase::Completed);
    assert_eq!(snapshot.node("abort").unwrap().phase, NodePhase::Pending);
}

#[tokio::test]
async fn test_failing_command_fails_the_run() {
    let wf = WorkflowDefinition::new("shell")
        .with_node(NodeInstance::new("start", node_types::START))
        .with_node(
            NodeInstance::new("boom", node_types::SHELL)
                .with_config("command", "sh")
                .with_config("args", json!(["-c", "exit 7"])),
        )
        .with_node(NodeInstance::new("end", node_types::END));

    let snapshot = run_to_end(&engine(), wf).await;

    assert_eq!(snapshot.status, RunStatus::Failed);
    assert!(snapshot.error.as_ref().unwrap().contains("code 7"));
    assert_eq!(snapshot.node("end").unwrap().phase, NodePhase::Pending);
}

#[test]
fn test_bad_builtin_config_is_rejected_at_submit() {
    let wf = WorkflowDefinition::new("bad")
        .with_node(NodeInstance::new("sh", node_types::SHELL).with_config("command", ""));
    assert!(engine().submit(wf).is_err());
}
