//! Message types for the tool wire protocol.
//!
//! Newline-delimited JSON-RPC 2.0 over a child's stdio, shaped after the Model
//! Context Protocol so the tool server can also be driven by MCP clients. A
//! client session is `initialize` → `notifications/initialized` →
//! `tools/call`. Both `devloop` and `devloop-tools` use these types.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Tool names understood by `devloop-tools`.
pub mod tool_names {
    pub const WRITE_FILE: &str = "write_file";
    pub const READ_FILE: &str = "read_file";
    pub const LIST_DIRECTORY: &str = "list_directory";
    pub const EXECUTE_CODE: &str = "execute_code";
    pub const QUERY_DOCS: &str = "query_docs";
    pub const SEARCH_GITHUB: &str = "search_github";

    pub const ALL: [&str; 6] = [
        WRITE_FILE,
        READ_FILE,
        LIST_DIRECTORY,
        EXECUTE_CODE,
        QUERY_DOCS,
        SEARCH_GITHUB,
    ];
}

/// `query_docs` answers that carry no knowledge-base content.
pub mod docs_replies {
    pub const NO_KNOWN_TERMS: &str = "No known terms found in query; try different wording.";
    pub const NO_RELEVANT_DOCS: &str = "No relevant documents found.";

    pub const ALL: [&str; 2] = [NO_KNOWN_TERMS, NO_RELEVANT_DOCS];
}

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A primitive argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ToolValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ToolValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ToolValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ToolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolValue::Bool(b) => write!(f, "{b}"),
            ToolValue::Int(n) => write!(f, "{n}"),
            ToolValue::Float(x) => write!(f, "{x}"),
            ToolValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ToolValue {
    fn from(value: &str) -> Self {
        ToolValue::Text(value.to_string())
    }
}

impl From<String> for ToolValue {
    fn from(value: String) -> Self {
        ToolValue::Text(value)
    }
}

impl From<i64> for ToolValue {
    fn from(value: i64) -> Self {
        ToolValue::Int(value)
    }
}

impl From<bool> for ToolValue {
    fn from(value: bool) -> Self {
        ToolValue::Bool(value)
    }
}

impl From<f64> for ToolValue {
    fn from(value: f64) -> Self {
        ToolValue::Float(value)
    }
}

/// Tool arguments: string keys to primitive values.
pub type ToolArgs = BTreeMap<String, ToolValue>;

/// Build a [`ToolArgs`] map from `(key, value)` pairs.
pub fn tool_args<K, V, I>(pairs: I) -> ToolArgs
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<ToolValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Parse a CLI-style `key=value` argument. Integers and booleans are typed;
/// everything else is text.
pub fn parse_arg(raw: &str) -> Result<(String, ToolValue)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("argument {raw:?} must be key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("argument {raw:?} has an empty key"));
    }
    let value = if let Ok(n) = value.parse::<i64>() {
        ToolValue::Int(n)
    } else if let Ok(b) = value.parse::<bool>() {
        ToolValue::Bool(b)
    } else {
        ToolValue::Text(value.to_string())
    };
    Ok((key.to_string(), value))
}

/// JSON-RPC request or notification (no `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// The `result` payload, or the server's error.
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(error.into());
        }
        self.result
            .ok_or_else(|| anyhow!("response {} carries neither result nor error", self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: ToolArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// First text block, or empty when the tool returned no content.
    pub fn first_text(&self) -> &str {
        match self.content.first() {
            Some(Content::Text { text }) => text,
            None => "",
        }
    }
}

/// Entry of a `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}
