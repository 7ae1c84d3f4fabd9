//! Typed decoding of normalized tool results.
//!
//! List operations come back in several shapes depending on how the host encodes them:
//! a JSON array, an object holding the list under a key, a bare object when the list had
//! one element, or a message-only object when nothing matched.

use kgmem_types::{Ack, ClientError};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(crate) fn decode_list<T: DeserializeOwned>(
    value: Value,
    key: &str,
) -> Result<Vec<T>, ClientError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(ClientError::Protocol(format!(
                    "'{}' is not a list: {}",
                    key, other
                )))
            }
            None if is_message_only(&map) => Vec::new(),
            None => vec![Value::Object(map)],
        },
        Value::Null => Vec::new(),
        other => {
            return Err(ClientError::Protocol(format!(
                "expected a list of {}, got {}",
                key, other
            )))
        }
    };
    items.into_iter().map(|item| decode_one(item, key)).collect()
}

pub(crate) fn decode_one<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::Protocol(format!("invalid {} entry: {}", what, e)))
}

/// Host acknowledgement text, or the raw value when it carries no message.
pub(crate) fn message_of(value: &Value) -> String {
    match value.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

pub(crate) fn ack(value: &Value) -> Ack {
    Ack {
        message: message_of(value),
    }
}

fn is_message_only(map: &serde_json::Map<String, Value>) -> bool {
    map.keys().all(|k| k == "message")
}
