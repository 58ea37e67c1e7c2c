//! Torbox response envelope handling.
//!
//! Every API response is wrapped as `{success, data?, detail?, error?, message?}`,
//! but the message fields are not consistently typed: a string, an array of
//! strings, or a nested object carrying `message`/`detail` all occur.

use serde_json::Value;

use super::TorboxError;
use super::constants::BODY_SNIPPET_CHARS;

const MESSAGE_FIELDS: [&str; 3] = ["detail", "error", "message"];

/// Extracts a human-readable message from an envelope, if any field carries one.
#[must_use]
pub fn envelope_message(payload: &Value) -> Option<String> {
    let object = payload.as_object()?;
    MESSAGE_FIELDS
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(message_from_value)
}

fn message_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty(text),
        Value::Array(items) => items
            .iter()
            .find_map(|item| item.as_str().and_then(non_empty)),
        Value::Object(map) => ["message", "detail"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(message_from_value),
        _ => None,
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Truncates a raw body to a short, char-safe snippet for diagnostics.
#[must_use]
pub fn body_snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    let mut snippet: String = trimmed.chars().take(BODY_SNIPPET_CHARS).collect();
    if trimmed.chars().count() > BODY_SNIPPET_CHARS {
        snippet.push('…');
    }
    snippet
}

/// Unwraps a successful-status payload into its `data`.
///
/// Payloads carrying neither `success` nor `data` are returned whole: some
/// legacy endpoints answer with the bare record.
///
/// # Errors
///
/// Returns [`TorboxError::Rejected`] when the envelope reports `success = false`.
pub fn unwrap_envelope(endpoint: &str, payload: Value) -> Result<Value, TorboxError> {
    let Value::Object(mut object) = payload else {
        return Ok(payload);
    };

    if object.get("success").and_then(Value::as_bool) == Some(false) {
        let message = envelope_message(&Value::Object(object))
            .unwrap_or_else(|| "request was not successful".to_string());
        return Err(TorboxError::Rejected {
            endpoint: endpoint.to_string(),
            message,
        });
    }

    if object.contains_key("success") || object.contains_key("data") {
        return Ok(object.remove("data").unwrap_or(Value::Null));
    }

    Ok(Value::Object(object))
}
