//! Typed configuration for the built-in node types.
//!
//! The wire format is always `type` + an open `config` map. Types known to
//! the engine decode into their own shape here; anything else (plugin nodes)
//! stays an open map and is validated by its executor.

use crate::workflow::NodeConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub mod node_types {
    pub const START: &str = "flow.start";
    pub const END: &str = "flow.end";
    pub const LOG: &str = "debug.log";
    pub const DELAY: &str = "time.delay";
    pub const SHELL: &str = "shell.command";
    pub const HTTP: &str = "http.request";
    pub const FILE_READ: &str = "file.read";
    pub const FILE_WRITE: &str = "file.write";
    pub const CONDITION: &str = "control.condition";
    pub const LOOP: &str = "control.loop";
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeSettings {
    Start,
    End,
    Log(LogSettings),
    Delay(DelaySettings),
    Shell(ShellSettings),
    Http(HttpSettings),
    FileRead(FileReadSettings),
    FileWrite(FileWriteSettings),
    Condition(ConditionSettings),
    Loop(LoopSettings),
    Custom(NodeConfig),
}

impl NodeSettings {
    pub fn parse(node_type: &str, config: &NodeConfig) -> Result<Self, String> {
        use node_types::*;

        Ok(match node_type {
            START => NodeSettings::Start,
            END => NodeSettings::End,
            LOG => NodeSettings::Log(decode(config)?),
            DELAY => NodeSettings::Delay(decode(config)?),
            SHELL => NodeSettings::Shell(decode(config)?),
            HTTP => NodeSettings::Http(decode(config)?),
            FILE_READ => NodeSettings::FileRead(decode(config)?),
            FILE_WRITE => NodeSettings::FileWrite(decode(config)?),
            CONDITION => NodeSettings::Condition(decode(config)?),
            LOOP => NodeSettings::Loop(decode(config)?),
            _ => NodeSettings::Custom(config.clone()),
        })
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, NodeSettings::Custom(_))
    }
}

fn decode<T: DeserializeOwned>(config: &NodeConfig) -> Result<T, String> {
    let object: serde_json::Map<String, Value> = config
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelaySettings {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellSettings {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    /// Falls back to the `url` input when absent.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReadSettings {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWriteSettings {
    #[serde(default)]
    pub path: Option<String>,
    /// Falls back to the `content` input when absent.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub append: bool,
}

/// Literal comparison; `left` falls back to the `value` input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSettings {
    #[serde(default)]
    pub left: Option<Value>,
    #[serde(default)]
    pub operator: Comparison,
    #[serde(default)]
    pub right: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Truthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSettings {
    pub iterations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> NodeConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn builtin_types_decode_into_their_shape() {
        let settings = NodeSettings::parse(
            node_types::SHELL,
            &config(json!({"command": "echo", "args": ["hi"], "onError": "retry"})),
        )
        .unwrap();

        match settings {
            NodeSettings::Shell(shell) => {
                assert_eq!(shell.command, "echo");
                assert_eq!(shell.args, vec!["hi".to_string()]);
            }
            other => panic!("unexpected settings: {:?}", other),
        }
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let err = NodeSettings::parse(node_types::LOOP, &config(json!({}))).unwrap_err();
        assert!(err.contains("iterations"));
    }

    #[test]
    fn unknown_types_keep_the_open_map() {
        let settings =
            NodeSettings::parse("ocr.read", &config(json!({"region": [0, 0, 10, 10]}))).unwrap();
        assert!(!settings.is_builtin());
        assert!(matches!(settings, NodeSettings::Custom(map) if map.contains_key("region")));
    }

    #[test]
    fn condition_defaults_to_equality() {
        let settings =
            NodeSettings::parse(node_types::CONDITION, &config(json!({"right": true}))).unwrap();
        assert_eq!(
            settings,
            NodeSettings::Condition(ConditionSettings {
                left: None,
                operator: Comparison::Eq,
                right: Some(json!(true)),
            })
        );
    }
}
