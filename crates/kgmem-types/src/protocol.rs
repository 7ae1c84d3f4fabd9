//! JSON-RPC 2.0 envelopes and tool-calling payloads exchanged with the remote host.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Outgoing request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outgoing notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Response envelope; exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Any inbound JSON-RPC message, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: Value,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Carries an id but neither a usable result nor a usable error.
    Malformed { id: Value, reason: String },
}

impl JsonRpcMessage {
    /// Classify one text frame. Fails only when the frame is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_str(text)?;
        let id = raw.id.filter(|v| !v.is_null());
        Ok(match (id, raw.method) {
            (Some(id), Some(method)) => JsonRpcMessage::Request {
                id,
                method,
                params: raw.params,
            },
            (None, Some(method)) => JsonRpcMessage::Notification {
                method,
                params: raw.params,
            },
            (Some(id), None) => match (raw.result, raw.error) {
                (_, Some(err)) => match serde_json::from_value::<JsonRpcError>(err) {
                    Ok(e) => JsonRpcMessage::Response {
                        id,
                        outcome: Err(e),
                    },
                    Err(e) => JsonRpcMessage::Malformed {
                        id,
                        reason: format!("invalid error object: {}", e),
                    },
                },
                (Some(result), None) => JsonRpcMessage::Response {
                    id,
                    outcome: Ok(result),
                },
                (None, None) => JsonRpcMessage::Malformed {
                    id,
                    reason: "response has neither result nor error".to_string(),
                },
            },
            (None, None) => JsonRpcMessage::Malformed {
                id: Value::Null,
                reason: "message has neither id nor method".to_string(),
            },
        })
    }
}

/// One content block inside a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Result of `tools/call` as sent by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(
        default,
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Result of `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_inbound_shapes() {
        let resp =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#).unwrap();
        assert_eq!(
            resp,
            JsonRpcMessage::Response {
                id: json!(7),
                outcome: Ok(json!({"ok": true}))
            }
        );

        let err = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":8,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        assert!(matches!(
            err,
            JsonRpcMessage::Response { outcome: Err(JsonRpcError { code: -32601, .. }), .. }
        ));

        let note =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","method":"notifications/message"}"#).unwrap();
        assert!(matches!(note, JsonRpcMessage::Notification { .. }));

        let ping =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":"s-1","method":"ping"}"#).unwrap();
        assert!(matches!(ping, JsonRpcMessage::Request { .. }));

        let bad = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":9}"#).unwrap();
        assert!(matches!(bad, JsonRpcMessage::Malformed { .. }));

        assert!(JsonRpcMessage::parse("not json").is_err());
    }

    #[test]
    fn unknown_content_blocks_still_decode() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "hi"},
                {"type": "audio", "data": "AAAA", "mimeType": "audio/wav"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.content[0], ContentBlock::text("hi"));
        assert_eq!(result.content[1], ContentBlock::Unsupported);
    }
}
