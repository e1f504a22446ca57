use crate::{decode_settings, settings};
use async_trait::async_trait;
use hubcore::settings::{Comparison, ConditionSettings, LoopSettings};
use hubcore::{
    node_types, ExecutorMetadata, NodeConfig, NodeContext, NodeError, NodeExecutor, NodeOutput,
    CONTROL_CATEGORY,
};
use serde_json::Value;
use std::cmp::Ordering;

const ITERATION_KEY: &str = "iteration";

/// Compare two values.
///
/// Numbers compare numerically and strings lexically. Ordering operators on
/// mismatched types are false. `truthy` looks only at `left`.
pub fn evaluate(operator: Comparison, left: &Value, right: &Value) -> bool {
    match operator {
        Comparison::Eq => loosely_equal(left, right),
        Comparison::Ne => !loosely_equal(left, right),
        Comparison::Gt => order(left, right) == Some(Ordering::Greater),
        Comparison::Gte => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
        Comparison::Lt => order(left, right) == Some(Ordering::Less),
        Comparison::Lte => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        Comparison::Truthy => truthy(left),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Branches on a comparison, following `true` or `false`.
///
/// Operands wired to the `left`/`right` inputs take precedence over config.
/// The `value` input is forwarded on both ports.
pub struct ConditionNode;

#[async_trait]
impl NodeExecutor for ConditionNode {
    fn node_type(&self) -> &str {
        node_types::CONDITION
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let ConditionSettings {
            left,
            operator,
            right,
        } = settings(&ctx)?;

        let left = ctx
            .inputs
            .get("left")
            .or(left.as_ref())
            .or_else(|| ctx.inputs.get("value"))
            .cloned()
            .unwrap_or(Value::Null);
        let right = ctx
            .inputs
            .get("right")
            .or(right.as_ref())
            .cloned()
            .unwrap_or(Value::Null);

        let result = evaluate(operator, &left, &right);
        let port = if result { "true" } else { "false" };
        ctx.events.info(format!("{} {:?} {} -> {}", left, operator, right, port));

        let forwarded = ctx.inputs.get("value").cloned().unwrap_or(left);
        Ok(NodeOutput::new()
            .with_output("result", result)
            .with_output(port, forwarded)
            .follow(port))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        decode_settings::<ConditionSettings>(config).map(|_| ())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Branch on a comparison", CONTROL_CATEGORY)
    }
}

/// Sends the walk around `body` a fixed number of times, then out `done`.
///
/// The counter lives in node memory, so it survives revisits within a run
/// and resets once the loop is left.
pub struct LoopNode;

#[async_trait]
impl NodeExecutor for LoopNode {
    fn node_type(&self) -> &str {
        node_types::LOOP
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let LoopSettings { iterations } = settings(&ctx)?;

        let mut memory = ctx.memory.write().await;
        let completed = memory
            .data
            .get(ITERATION_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0);

        if completed < iterations {
            memory
                .data
                .insert(ITERATION_KEY.to_string(), Value::from(completed + 1));
            ctx.events
                .progress(completed as f64 / iterations as f64 * 100.0, None);

            Ok(NodeOutput::new()
                .with_outputs(ctx.inputs.clone())
                .with_output("index", completed)
                .follow("body"))
        } else {
            memory.data.remove(ITERATION_KEY);
            ctx.events.info(format!("Loop finished after {} iterations", iterations));

            Ok(NodeOutput::new()
                .with_outputs(ctx.inputs.clone())
                .with_output("iterations", iterations)
                .follow("done"))
        }
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        decode_settings::<LoopSettings>(config).map(|_| ())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Repeat a body a fixed number of times", CONTROL_CATEGORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_numerically() {
        assert!(evaluate(Comparison::Eq, &json!(1), &json!(1.0)));
        assert!(evaluate(Comparison::Gt, &json!(10), &json!(9.5)));
        assert!(evaluate(Comparison::Lte, &json!(3), &json!(3)));
        assert!(!evaluate(Comparison::Lt, &json!(3), &json!(3)));
    }

    #[test]
    fn strings_compare_lexically() {
        assert!(evaluate(Comparison::Lt, &json!("apple"), &json!("banana")));
        assert!(evaluate(Comparison::Ne, &json!("a"), &json!("b")));
        assert!(evaluate(Comparison::Eq, &json!("ok"), &json!("ok")));
    }

    #[test]
    fn mixed_types_never_order() {
        assert!(!evaluate(Comparison::Gt, &json!("10"), &json!(2)));
        assert!(!evaluate(Comparison::Lte, &json!(null), &json!(0)));
        assert!(!evaluate(Comparison::Eq, &json!("1"), &json!(1)));
    }

    #[test]
    fn truthiness() {
        for value in [json!(true), json!(1), json!("x"), json!([0]), json!({"a": 1})] {
            assert!(evaluate(Comparison::Truthy, &value, &Value::Null), "{}", value);
        }
        for value in [json!(false), json!(0), json!(""), json!([]), json!({}), json!(null)] {
            assert!(!evaluate(Comparison::Truthy, &value, &Value::Null), "{}", value);
        }
    }
}
