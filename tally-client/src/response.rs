//! Response decoding and error-body summaries.
//!
//! A successful body must be a JSON object carrying a non-empty string
//! `period_key`. Every other field is the payload:
//!
//! ```json
//! { "period_key": "2024-03-04", "score": 73 }
//! ```
//!
//! decodes to payload `{ "score": 73 }` for period `2024-03-04`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tally_core::{GeneratedResult, GenerationError, PeriodKey};

/// Field carrying the period the result was computed for.
pub const PERIOD_KEY_FIELD: &str = "period_key";

/// Longest error body echoed back into an error message.
const MAX_ERROR_SUMMARY: usize = 200;

/// Validate and split a success body into payload and period key.
pub fn decode_generated<T: DeserializeOwned>(
    body: &[u8],
) -> Result<GeneratedResult<T>, GenerationError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| GenerationError::invalid_response(format!("body is not JSON: {}", e)))?;

    let Value::Object(mut fields) = value else {
        return Err(GenerationError::invalid_response(
            "body is not a JSON object",
        ));
    };

    let period_key = match fields.remove(PERIOD_KEY_FIELD) {
        Some(Value::String(key)) if !key.trim().is_empty() => PeriodKey::new(key),
        Some(Value::String(_)) => {
            return Err(GenerationError::invalid_response("period_key is empty"))
        }
        Some(other) => {
            return Err(GenerationError::invalid_response(format!(
                "period_key must be a string, got {}",
                json_type(&other)
            )))
        }
        None => return Err(GenerationError::invalid_response("missing period_key")),
    };

    let payload: T = serde_json::from_value(Value::Object(fields))
        .map_err(|e| GenerationError::invalid_response(format!("payload mismatch: {}", e)))?;

    Ok(GeneratedResult::new(payload, period_key))
}

/// Best human-readable message from an error body.
///
/// Looks for `error` (string or `{ "message": .. }`), `message` and
/// `detail`, falling back to the raw text cut to a sane length.
pub fn summarize_error_body(body: &str) -> Option<String> {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        let from_error = fields.get("error").and_then(|error| match error {
            Value::String(message) => Some(message.clone()),
            Value::Object(inner) => inner
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        });
        let message = from_error
            .or_else(|| fields.get("message").and_then(Value::as_str).map(str::to_string))
            .or_else(|| fields.get("detail").and_then(Value::as_str).map(str::to_string));
        if message.is_some() {
            return message;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_ERROR_SUMMARY).collect())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
