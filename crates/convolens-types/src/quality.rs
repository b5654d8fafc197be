//! Shared low-quality-content probes.
//!
//! The placeholder token list is referenced by both the contract validator
//! and the report synchronizer's quality gate; the validator must accept any
//! structurally valid payload regardless of source, while the sync gate
//! enforces a stricter content bar before publishing.

use serde_json::Value;

pub const PLACEHOLDER_TOKENS: [&str; 11] = [
    "placeholder",
    "insufficient-evidence",
    "no validated",
    "need more session mechanism outputs",
    "collect-more-session-insights",
    "tbd",
    "trigger-missing",
    "action-missing",
    "root-cause-missing",
    "gain-missing",
    "window-missing",
];

pub const MECHANISM_TOKENS: [&str; 13] = [
    "机制",
    "根因",
    "导致",
    "因为",
    "动作",
    "验证",
    "改善",
    "干预",
    "hypothesis",
    "root cause",
    "trigger",
    "action",
    "validation",
];

const BLOCKED_ENGINES: [&str; 3] = ["manual", "mock", "template"];

const BLOCKED_PROVIDERS: [&str; 5] = ["skill-manual", "manual", "mock", "api-mock", "template"];

const BLOCKED_RUN_ID_TOKENS: [&str; 3] = ["replace-mock-sidecars", "mock-sidecar", "mock-backfill"];

/// True when text is empty or carries a low-quality placeholder marker.
pub fn contains_placeholder(text: &str) -> bool {
    let content = text.trim().to_lowercase();
    if content.is_empty() {
        return true;
    }
    PLACEHOLDER_TOKENS.iter().any(|token| content.contains(token))
}

/// True when text contains mechanism-level explanation/action markers.
pub fn looks_mechanistic(text: &str) -> bool {
    let content = text.trim().to_lowercase();
    if content.is_empty() {
        return false;
    }
    MECHANISM_TOKENS.iter().any(|token| content.contains(token))
}

fn lowered(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Reason why a generated_by block marks a payload as simulated output, if any.
pub fn generated_by_block_reason(generated_by: &Value) -> Option<String> {
    let map = generated_by.as_object()?;

    let engine = lowered(map.get("engine"));
    let provider = lowered(map.get("provider"));
    let run_id = lowered(map.get("run_id"));

    if BLOCKED_ENGINES.contains(&engine.as_str()) {
        return Some(format!("generated_by.engine={} is not allowed", engine));
    }
    if BLOCKED_PROVIDERS.contains(&provider.as_str()) {
        return Some(format!("generated_by.provider={} is not allowed", provider));
    }
    if BLOCKED_RUN_ID_TOKENS.iter().any(|token| run_id.contains(token)) {
        return Some(format!("generated_by.run_id contains blocked token: {}", run_id));
    }
    None
}
