//! Collapse tool results into plain JSON values.
//!
//! Hosts wrap tool output in content blocks, and list-valued outputs arrive as one text
//! block per item. Callers only ever see the decoded value.

use kgmem_types::{CallToolResult, ClientError, ContentBlock};
use serde_json::{json, Value};

/// Value reported for a successful call that produced no content.
pub const COMPLETED_MESSAGE: &str = "Operation completed successfully";

/// Decode a `tools/call` result. `isError: true` becomes `RemoteTool`.
pub fn normalize_tool_result(result: CallToolResult) -> Result<Value, ClientError> {
    if result.is_error {
        let message = result
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        let message = if message.is_empty() {
            "tool reported an error".to_string()
        } else {
            message
        };
        return Err(ClientError::RemoteTool {
            code: None,
            message,
        });
    }
    let mut content = result.content;
    Ok(match content.len() {
        0 => result
            .structured_content
            .unwrap_or_else(|| json!({ "message": COMPLETED_MESSAGE })),
        1 => normalize_block(content.remove(0)),
        _ => Value::Array(content.into_iter().map(normalize_block).collect()),
    })
}

/// Decode text as JSON, or wrap it as `{"message": text}`.
pub(crate) fn decode_text(text: String) -> Value {
    match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => json!({ "message": text }),
    }
}

fn normalize_block(block: ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => decode_text(text),
        ContentBlock::Image { data, mime_type } => json!({
            "message": format!("[{} image, {} base64 bytes]", mime_type, data.len())
        }),
        ContentBlock::Resource { resource } => match resource.get("text").and_then(Value::as_str) {
            Some(text) => decode_text(text.to_string()),
            None => json!({ "message": resource.to_string() }),
        },
        ContentBlock::Unsupported => json!({ "message": "unsupported content block" }),
    }
}

/// Hosts report tool-level failures as `{"error": "..."}` payloads.
pub fn reject_error_payload(value: Value) -> Result<Value, ClientError> {
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(ClientError::RemoteTool {
            code: None,
            message: message.to_string(),
        });
    }
    Ok(value)
}
