//! Tolerant normalization of raw model output into the SessionMechanismV1
//! candidate shape.
//!
//! Provider responses are untyped JSON whose key set varies per model. The
//! pipeline is: extract the first JSON object (skill runtime), coerce
//! alternate key names and drop unusable sub-items here, then let the strict
//! validator decide. Unknown keys from the raw payload are not carried over;
//! the persisted sidecar is exactly the contract surface.

use convolens_types::util::{now_iso, squash_whitespace};
use convolens_types::{ActionItem, Evidence, GeneratedBy, SessionMechanism, WhyItem, SESSION_SCHEMA};
use serde_json::Value;

/// Provenance stamped into `generated_by` for each normalized record.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub engine: String,
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => squash_whitespace(s),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn coerce_turn_id(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) => n.as_u64().filter(|&id| id > 0),
        Some(Value::String(s)) => {
            let raw = s.trim();
            if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
                raw.parse::<u64>().ok().filter(|&id| id > 0)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn coerce_confidence(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn object_entries(value: Option<&Value>) -> Vec<&serde_json::Map<String, Value>> {
    match value {
        Some(Value::Object(map)) => vec![map],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// Normalize an evidence list, dropping entries that lack a concrete
/// session_id, positive turn_id, or snippet.
fn normalize_evidence_list(value: Option<&Value>) -> Vec<Evidence> {
    let mut normalized = Vec::new();
    for entry in object_entries(value) {
        let session_id = as_text(entry.get("session_id"));
        let snippet = as_text(entry.get("snippet"));
        let Some(turn_id) = coerce_turn_id(entry.get("turn_id")) else {
            continue;
        };
        if session_id.is_empty() || snippet.is_empty() {
            continue;
        }
        let tier = as_text(entry.get("tier"));
        normalized.push(Evidence {
            session_id,
            turn_id,
            snippet,
            tier: (tier == "primary" || tier == "supporting").then_some(tier),
        });
    }
    normalized
}

fn first_non_empty_text(map: &serde_json::Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| as_text(map.get(*key)))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn normalize_actions(value: Option<&Value>) -> Vec<ActionItem> {
    object_entries(value)
        .into_iter()
        .map(|item| ActionItem {
            trigger: first_non_empty_text(item, &["trigger", "when", "condition"]),
            action: first_non_empty_text(item, &["action", "do", "step"]),
            expected_gain: first_non_empty_text(item, &["expected_gain", "expect", "benefit", "outcome"]),
            validation_window: first_non_empty_text(item, &["validation_window", "validate", "window"]),
        })
        .collect()
}

fn normalize_labels(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
        Some(Value::Array(items)) => items
            .iter()
            .map(|label| as_text(Some(label)))
            .filter(|label| !label.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Coerce a raw model payload into best-effort SessionMechanismV1 parts.
///
/// Identity and `generated_by` fields are left empty; callers fill them via
/// [`normalize_session_output`].
pub fn sanitize_session_output(raw: &Value) -> SessionMechanism {
    let empty = serde_json::Map::new();
    let item = raw.as_object().unwrap_or(&empty);

    let mut what_happened: Vec<String> = item
        .get("what_happened")
        .and_then(Value::as_array)
        .map(|texts| {
            texts
                .iter()
                .map(|text| as_text(Some(text)))
                .filter(|text| !text.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if what_happened.is_empty() {
        for key in ["event", "outcome", "observed_behavior", "observation", "phenomenon"] {
            let text = as_text(item.get(key));
            if !text.is_empty() {
                what_happened.push(text);
            }
        }
        if item.contains_key("snippet") {
            let text = as_text(item.get("snippet"));
            if !text.is_empty() {
                what_happened.push(text);
            }
        }
    }

    let mut summary = as_text(item.get("summary"));
    if summary.is_empty() {
        if let Some(first) = what_happened.first() {
            summary = first.clone();
        }
    }

    let mut source_items = object_entries(item.get("why"));
    let fallback_why;
    if source_items.is_empty() && !as_text(item.get("hypothesis")).is_empty() {
        let mut map = serde_json::Map::new();
        for key in ["hypothesis", "confidence", "evidence"] {
            if let Some(value) = item.get(key) {
                map.insert(key.to_string(), value.clone());
            }
        }
        fallback_why = map;
        source_items = vec![&fallback_why];
    }

    let why: Vec<WhyItem> = source_items
        .into_iter()
        .map(|entry| {
            let mut evidence = normalize_evidence_list(entry.get("evidence"));
            if evidence.is_empty() && item.contains_key("evidence") {
                evidence = normalize_evidence_list(item.get("evidence"));
            }
            WhyItem {
                hypothesis: first_non_empty_text(entry, &["hypothesis", "root_cause", "reasoning"]),
                confidence: coerce_confidence(entry.get("confidence")),
                evidence,
            }
        })
        .collect();

    let mut how_to_improve = normalize_actions(item.get("how_to_improve"));
    if how_to_improve.is_empty() {
        for fallback_key in ["interventions", "recommendations", "actions"] {
            how_to_improve = normalize_actions(item.get(fallback_key));
            if !how_to_improve.is_empty() {
                break;
            }
        }
    }

    SessionMechanism {
        schema_version: SESSION_SCHEMA.to_string(),
        session_id: String::new(),
        created_at: String::new(),
        week: None,
        period_id: None,
        what_happened,
        why,
        how_to_improve,
        labels: normalize_labels(item.get("labels")),
        summary,
        generated_by: GeneratedBy {
            engine: String::new(),
            provider: String::new(),
            model: String::new(),
            run_id: String::new(),
            generated_at: String::new(),
        },
    }
}

/// Normalize model output into a SessionMechanismV1 envelope, overriding
/// identity fields from the digest and stamping run provenance.
pub fn normalize_session_output(raw: &Value, digest: &Value, ctx: &RunContext) -> SessionMechanism {
    let mut item = sanitize_session_output(raw);

    let digest_str = |key: &str| -> String {
        digest
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    item.session_id = digest_str("session_id");
    item.created_at = digest_str("created_at");
    let week = digest_str("week");
    let period_id = {
        let explicit = digest_str("period_id");
        if explicit.is_empty() { week.clone() } else { explicit }
    };
    item.week = (!week.is_empty()).then_some(week);
    item.period_id = (!period_id.is_empty()).then_some(period_id);
    item.generated_by = GeneratedBy {
        engine: ctx.engine.clone(),
        provider: ctx.provider.clone(),
        model: ctx.model.clone(),
        run_id: ctx.run_id.clone(),
        generated_at: now_iso(),
    };
    item
}

/// Normalize a batch result payload to a list of session records.
///
/// Accepts a bare list, a `{"sessions": [...]}` envelope, or a map keyed by
/// session id.
pub fn normalize_session_batch(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.iter().filter(|item| item.is_object()).cloned().collect(),
        Value::Object(map) => {
            if let Some(Value::Array(sessions)) = map.get("sessions") {
                return sessions.iter().filter(|item| item.is_object()).cloned().collect();
            }
            let mut normalized = Vec::new();
            for (sid, value) in map {
                let Some(entry) = value.as_object() else {
                    continue;
                };
                let mut item = entry.clone();
                item.entry("session_id".to_string())
                    .or_insert_with(|| Value::String(sid.clone()));
                normalized.push(Value::Object(item));
            }
            normalized
        }
        _ => Vec::new(),
    }
}

/// Normalize model output to an incremental mechanism aggregate object.
///
/// Accepts either a payload already carrying the incremental schema version
/// or an `{"incremental": {...}}` wrapper; anything else is unusable.
pub fn coerce_incremental_payload(raw: &Value) -> Option<Value> {
    if raw.get("schema_version").and_then(Value::as_str)
        == Some(convolens_types::INCREMENTAL_SCHEMA)
    {
        return Some(raw.clone());
    }
    match raw.get("incremental") {
        Some(inner) if inner.is_object() => Some(inner.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext {
            run_id: "run-test".to_string(),
            provider: "claude_cli".to_string(),
            model: "sonnet".to_string(),
            engine: "api".to_string(),
        }
    }

    fn digest() -> Value {
        json!({
            "session_id": "s-1",
            "created_at": "2026-02-06T10:00:00+00:00",
            "week": "2026-W06",
        })
    }

    #[test]
    fn coerces_digit_string_turn_id_and_confidence() {
        let raw = json!({
            "summary": "测试输出",
            "what_happened": ["发生了澄清循环"],
            "why": [{
                "hypothesis": "开场上下文不足",
                "confidence": "0.72",
                "evidence": [{"session_id": "s-1", "turn_id": "1", "snippet": "Please help"}],
            }],
            "how_to_improve": [{
                "trigger": "t", "action": "a", "expected_gain": "g", "validation_window": "w",
            }],
        });
        let normalized = normalize_session_output(&raw, &digest(), &ctx());
        assert_eq!(normalized.why[0].confidence, Some(0.72));
        assert_eq!(normalized.why[0].evidence[0].turn_id, 1);
        assert_eq!(normalized.session_id, "s-1");
        assert_eq!(normalized.week.as_deref(), Some("2026-W06"));
        assert_eq!(normalized.period_id.as_deref(), Some("2026-W06"));
        assert_eq!(normalized.generated_by.provider, "claude_cli");
    }

    #[test]
    fn drops_unusable_evidence() {
        let raw = json!({
            "why": [{
                "hypothesis": "h",
                "evidence": [
                    {"session_id": "", "turn_id": 1, "snippet": "x"},
                    {"session_id": "s-1", "turn_id": -2, "snippet": "x"},
                    {"session_id": "s-1", "turn_id": "abc", "snippet": "x"},
                    {"session_id": "s-1", "turn_id": 3, "snippet": ""},
                    {"session_id": "s-1", "turn_id": 2, "snippet": "kept", "tier": "primary"},
                ],
            }],
        });
        let item = sanitize_session_output(&raw);
        assert_eq!(item.why[0].evidence.len(), 1);
        assert_eq!(item.why[0].evidence[0].turn_id, 2);
        assert_eq!(item.why[0].evidence[0].tier.as_deref(), Some("primary"));
    }

    #[test]
    fn maps_alternate_action_keys() {
        let raw = json!({
            "interventions": [{
                "when": "新任务启动",
                "do": "补充目标、边界、完成标准",
                "expect": "减少澄清轮次",
                "window": "next-10-sessions",
            }],
        });
        let item = sanitize_session_output(&raw);
        assert_eq!(item.how_to_improve[0].trigger, "新任务启动");
        assert_eq!(item.how_to_improve[0].action, "补充目标、边界、完成标准");
        assert_eq!(item.how_to_improve[0].expected_gain, "减少澄清轮次");
        assert_eq!(item.how_to_improve[0].validation_window, "next-10-sessions");
    }

    #[test]
    fn builds_why_from_flat_hypothesis() {
        let raw = json!({
            "event": "出现澄清循环",
            "hypothesis": "初始约束不足",
            "confidence": "0.66",
            "evidence": [{"session_id": "s-1", "turn_id": "1", "snippet": "Please help"}],
        });
        let item = sanitize_session_output(&raw);
        assert_eq!(item.what_happened, vec!["出现澄清循环".to_string()]);
        assert_eq!(item.summary, "出现澄清循环");
        assert_eq!(item.why[0].hypothesis, "初始约束不足");
        assert_eq!(item.why[0].confidence, Some(0.66));
        assert_eq!(item.why[0].evidence[0].session_id, "s-1");
    }

    #[test]
    fn labels_accept_string_or_list() {
        let item = sanitize_session_output(&json!({"labels": "scope"}));
        assert_eq!(item.labels, vec!["scope".to_string()]);
        let item = sanitize_session_output(&json!({"labels": ["a", "", "b"]}));
        assert_eq!(item.labels, vec!["a".to_string(), "b".to_string()]);
        let item = sanitize_session_output(&json!({"labels": 3}));
        assert!(item.labels.is_empty());
    }

    #[test]
    fn batch_accepts_list_envelope_and_map() {
        let list = normalize_session_batch(&json!([{"a": 1}, "junk"]));
        assert_eq!(list.len(), 1);

        let envelope = normalize_session_batch(&json!({"sessions": [{"a": 1}, {"b": 2}]}));
        assert_eq!(envelope.len(), 2);

        let map = normalize_session_batch(&json!({"s-1": {"summary": "x"}}));
        assert_eq!(map[0]["session_id"], "s-1");
    }
}
