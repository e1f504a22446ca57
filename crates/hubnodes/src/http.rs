use crate::{decode_settings, settings};
use async_trait::async_trait;
use hubcore::settings::HttpSettings;
use hubcore::{
    json_type_name, node_types, ExecutorMetadata, NodeConfig, NodeContext, NodeError,
    NodeExecutor, NodeOutput,
};
use reqwest::Method;
use serde_json::Value;

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_method(method: &str) -> Result<Method, NodeError> {
    Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| NodeError::Configuration(format!("Unsupported method: {}", method)))
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        node_types::HTTP
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let HttpSettings {
            url,
            method,
            headers,
            body,
        } = settings(&ctx)?;

        let url = ctx.string_input_or("url", url.as_deref())?;
        let method = parse_method(&method)?;

        ctx.events.info(format!("{} {}", method, url));

        let mut request = self.client.request(method, &url);
        for (key, value) in &headers {
            request = request.header(key, value);
        }

        match ctx.inputs.get("body").or(body.as_ref()) {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(Value::Null) | None => {}
            Some(json) => request = request.json(json),
        }

        let response = tokio::select! {
            sent = request.send() => sent
                .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status();
        let headers_map: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status.as_u16()));

        let mut output = if status.is_client_error() || status.is_server_error() {
            NodeOutput::failure(format!("{} returned {}", url, status))
        } else {
            NodeOutput::new()
        };
        if let Ok(json) = serde_json::from_str::<Value>(&body_text) {
            output = output.with_output("json", json);
        }

        Ok(output
            .with_output("status", status.as_u16())
            .with_output("body", body_text)
            .with_output("headers", Value::Object(headers_map)))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        let settings: HttpSettings = decode_settings(config)?;
        parse_method(&settings.method)?;
        if let Some(body) = config.get("body") {
            if !matches!(body, Value::String(_) | Value::Object(_) | Value::Array(_) | Value::Null) {
                return Err(NodeError::InvalidInputType {
                    field: "body".to_string(),
                    expected: "string, object or array".to_string(),
                    actual: json_type_name(body).to_string(),
                });
            }
        }
        Ok(())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Make HTTP requests", "http")
    }
}
