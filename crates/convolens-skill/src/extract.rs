//! Tolerant JSON extraction from model output.

use crate::backend::InferError;
use serde_json::Value;

/// Extract the first JSON object from model text output.
///
/// Fast path: the whole response is JSON. Otherwise scan for the first `{`
/// or `[` and stream-decode the first complete value, tolerating trailing
/// prose.
pub fn extract_json_payload(text: &str) -> Result<Value, InferError> {
    let content = text.trim();
    if content.is_empty() {
        return Err(InferError::new("empty model output"));
    }

    if let Ok(parsed) = serde_json::from_str::<Value>(content) {
        if parsed.is_object() {
            return Ok(parsed);
        }
    }

    for (idx, ch) in content.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&content[idx..]).into_iter::<Value>();
        if let Some(Ok(parsed)) = stream.next() {
            if parsed.is_object() {
                return Ok(parsed);
            }
        }
    }
    Err(InferError::new("no json object found in model output"))
}

/// Parse a CLI JSON output envelope and extract the target payload.
///
/// The envelope may carry `result` (a string of JSON) or `content` (a list
/// of text blocks); failing both, the object itself may already be the
/// target payload, and as a last resort the payload is extracted straight
/// from stdout.
pub fn extract_cli_json_response(stdout: &str) -> Result<Value, InferError> {
    if let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(stdout.trim()) {
        if let Some(result) = parsed.get("result").and_then(Value::as_str) {
            if !result.trim().is_empty() {
                return extract_json_payload(result);
            }
        }

        if let Some(content) = parsed.get("content").and_then(Value::as_array) {
            let text: String = content
                .iter()
                .filter_map(Value::as_object)
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            if !text.trim().is_empty() {
                return extract_json_payload(&text);
            }
        }

        let looks_like_target = parsed.get("schema_version").and_then(Value::as_str)
            == Some("session-mechanism.v1")
            || parsed.contains_key("session_id");
        if looks_like_target {
            return Ok(Value::Object(parsed));
        }
    }
    extract_json_payload(stdout)
}
