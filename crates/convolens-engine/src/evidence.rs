//! Evidence selection and mechanism-signal probes over sidecar payloads.

use convolens_types::quality::{contains_placeholder, generated_by_block_reason};
use convolens_types::util::{now_iso, snippet};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

const EVIDENCE_SNIPPET_CHARS: usize = 240;
const INCREMENTAL_HYPOTHESIS_CHARS: usize = 28;
const INCREMENTAL_ACTION_CHARS: usize = 14;

fn text_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn normalize_evidence_text(value: Option<&Value>) -> String {
    snippet(value.and_then(Value::as_str).unwrap_or_default(), EVIDENCE_SNIPPET_CHARS)
}

fn evidence_identity(item: &Value) -> Option<(String, u64, String)> {
    let session_id = text_field(item, "session_id");
    if session_id.is_empty() {
        return None;
    }
    let turn_id = item.get("turn_id")?.as_u64().filter(|&id| id > 0)?;
    let normalized = normalize_evidence_text(item.get("snippet"));
    if normalized.is_empty() {
        return None;
    }
    Some((session_id, turn_id, normalized.to_lowercase()))
}

/// Deduplicate evidence by (session, turn, snippet) identity.
pub fn dedupe_evidence(entries: &[Value]) -> Vec<Value> {
    let mut seen: HashSet<(String, u64, String)> = HashSet::new();
    let mut result = Vec::new();
    for entry in entries {
        if !entry.is_object() {
            continue;
        }
        let Some(key) = evidence_identity(entry) else {
            continue;
        };
        if !seen.insert(key.clone()) {
            continue;
        }
        result.push(json!({
            "session_id": key.0,
            "turn_id": key.1,
            "snippet": normalize_evidence_text(entry.get("snippet")),
        }));
    }
    result
}

/// Select layered evidence with dedupe and cross-session prioritization.
///
/// The primary tier takes at most one entry per distinct session; remaining
/// slots are filled as supporting evidence.
pub fn select_diverse_evidence(entries: &[Value], max_items: usize, primary_limit: usize) -> Vec<Value> {
    if max_items == 0 {
        return Vec::new();
    }
    let deduped = dedupe_evidence(entries);
    if deduped.is_empty() {
        return Vec::new();
    }

    let mut selected: Vec<Value> = Vec::new();
    let mut seen_sessions: HashSet<String> = HashSet::new();
    let primary_cap = primary_limit.clamp(1, max_items);

    for entry in &deduped {
        let sid = text_field(entry, "session_id");
        if sid.is_empty() || seen_sessions.contains(&sid) {
            continue;
        }
        let mut item = entry.as_object().cloned().unwrap_or_default();
        item.insert("tier".to_string(), json!("primary"));
        selected.push(Value::Object(item));
        seen_sessions.insert(sid);
        if selected.len() >= primary_cap {
            break;
        }
    }

    for entry in &deduped {
        if selected.len() >= max_items {
            break;
        }
        let duplicate = selected.iter().any(|existing| {
            text_field(existing, "session_id") == text_field(entry, "session_id")
                && existing.get("turn_id").and_then(Value::as_u64)
                    == entry.get("turn_id").and_then(Value::as_u64)
                && text_field(existing, "snippet") == text_field(entry, "snippet")
        });
        if duplicate {
            continue;
        }
        let mut item = entry.as_object().cloned().unwrap_or_default();
        item.insert("tier".to_string(), json!("supporting"));
        selected.push(Value::Object(item));
    }

    selected
}

/// Whether an evidence item is concrete and non-placeholder.
pub fn has_valid_evidence_item(item: &Value) -> bool {
    let session_id = text_field(item, "session_id");
    if session_id.is_empty() || matches!(session_id.to_lowercase().as_str(), "n/a" | "unknown") {
        return false;
    }
    if !item.get("turn_id").and_then(Value::as_u64).is_some_and(|id| id > 0) {
        return false;
    }
    let snippet_text = text_field(item, "snippet");
    !snippet_text.is_empty() && !contains_placeholder(&snippet_text)
}

/// Whether a session sidecar contains usable mechanism insights: at least one
/// non-placeholder hypothesis backed by one concrete evidence item.
pub fn session_has_mechanism_signal(session: &Value) -> bool {
    if let Some(generated_by) = session.get("generated_by") {
        if generated_by_block_reason(generated_by).is_some() {
            return false;
        }
    }

    if contains_placeholder(&text_field(session, "summary")) {
        return false;
    }

    let Some(why_items) = session.get("why").and_then(Value::as_array) else {
        return false;
    };
    for why in why_items {
        if !why.is_object() {
            continue;
        }
        let hypothesis = text_field(why, "hypothesis");
        if hypothesis.is_empty() || contains_placeholder(&hypothesis) {
            continue;
        }
        let Some(evidence) = why.get("evidence").and_then(Value::as_array) else {
            continue;
        };
        if evidence
            .iter()
            .any(|item| item.is_object() && has_valid_evidence_item(item))
        {
            return true;
        }
    }
    false
}

/// Build a compact session payload for incremental Skill inference.
pub fn compact_session_for_incremental(session: &Value) -> Value {
    let mut compact = Map::new();
    compact.insert("session_id".to_string(), json!(text_field(session, "session_id")));
    compact.insert("created_at".to_string(), json!(text_field(session, "created_at")));

    if let Some(labels) = session.get("labels").and_then(Value::as_array) {
        let kept: Vec<String> = labels
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .take(1)
            .collect();
        compact.insert("labels".to_string(), json!(kept));
    }

    let mut mechanism = Map::new();
    for why in session.get("why").and_then(Value::as_array).into_iter().flatten() {
        if !why.is_object() {
            continue;
        }
        let hypothesis = text_field(why, "hypothesis");
        if hypothesis.is_empty() {
            continue;
        }
        mechanism.insert(
            "hypothesis".to_string(),
            json!(snippet(&hypothesis, INCREMENTAL_HYPOTHESIS_CHARS)),
        );
        if let Some(confidence) = why.get("confidence").and_then(Value::as_f64) {
            mechanism.insert("confidence".to_string(), json!((confidence * 1000.0).round() / 1000.0));
        }
        if let Some(evidence_raw) = why.get("evidence").and_then(Value::as_array) {
            let filtered: Vec<Value> = evidence_raw
                .iter()
                .filter(|ev| ev.is_object() && has_valid_evidence_item(ev))
                .cloned()
                .collect();
            let evidence_refs: Vec<String> = select_diverse_evidence(&filtered, 1, 1)
                .iter()
                .filter_map(|item| {
                    let sid = text_field(item, "session_id");
                    let tid = item.get("turn_id").and_then(Value::as_u64).unwrap_or(0);
                    (!sid.is_empty() && tid > 0).then(|| format!("{}#T{}", sid, tid))
                })
                .collect();
            if !evidence_refs.is_empty() {
                mechanism.insert("evidence_refs".to_string(), json!(evidence_refs));
            }
        }
        if !mechanism.is_empty() {
            break;
        }
    }
    if !mechanism.is_empty() {
        compact.insert("mechanism".to_string(), Value::Object(mechanism));
    }

    for action in session.get("how_to_improve").and_then(Value::as_array).into_iter().flatten() {
        if !action.is_object() {
            continue;
        }
        let do_action = text_field(action, "action");
        if do_action.is_empty() {
            continue;
        }
        compact.insert(
            "action_ref".to_string(),
            json!(snippet(&do_action, INCREMENTAL_ACTION_CHARS)),
        );
        break;
    }

    Value::Object(compact)
}

/// Build the IncrementalInputV1 payload for Skill execution.
#[allow(clippy::too_many_arguments)]
pub fn build_incremental_input(
    period_id: &str,
    run_id: &str,
    window: Option<&str>,
    since: Option<&str>,
    until: Option<&str>,
    sessions_total: usize,
    sessions: &[Value],
) -> Value {
    let mut period = Map::new();
    if let Some(window) = window {
        period.insert("window".to_string(), json!(window));
    }
    if let Some(since) = since {
        period.insert("since".to_string(), json!(since));
    }
    if let Some(until) = until {
        period.insert("until".to_string(), json!(until));
    }

    let compact_sessions: Vec<Value> = sessions.iter().map(compact_session_for_incremental).collect();
    json!({
        "schema_version": "incremental-input.v1",
        "period_id": period_id,
        "generated_at": now_iso(),
        "source_run_id": run_id,
        "period": Value::Object(period),
        "coverage": {
            "sessions_total": sessions_total.max(compact_sessions.len()),
            "sessions_with_mechanism": compact_sessions.len(),
        },
        "sessions": compact_sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(sid: &str, turn: u64, snippet: &str) -> Value {
        json!({"session_id": sid, "turn_id": turn, "snippet": snippet})
    }

    #[test]
    fn dedupes_by_identity() {
        let entries = vec![
            evidence("s-1", 1, "same  text"),
            evidence("s-1", 1, "Same text"),
            evidence("s-1", 2, "same text"),
            json!({"session_id": "", "turn_id": 1, "snippet": "x"}),
        ];
        let deduped = dedupe_evidence(&entries);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0]["snippet"], "same text");
    }

    #[test]
    fn diverse_selection_prefers_distinct_sessions() {
        let entries = vec![
            evidence("s-1", 1, "a"),
            evidence("s-1", 2, "b"),
            evidence("s-2", 1, "c"),
            evidence("s-3", 1, "d"),
        ];
        let selected = select_diverse_evidence(&entries, 4, 3);
        assert_eq!(selected.len(), 4);
        assert_eq!(selected[0]["tier"], "primary");
        assert_eq!(selected[0]["session_id"], "s-1");
        assert_eq!(selected[1]["session_id"], "s-2");
        assert_eq!(selected[2]["session_id"], "s-3");
        assert_eq!(selected[3]["tier"], "supporting");
        assert_eq!(selected[3]["turn_id"], 2);
    }

    #[test]
    fn valid_evidence_rejects_placeholders_and_unknown_sessions() {
        assert!(has_valid_evidence_item(&evidence("s-1", 1, "concrete")));
        assert!(!has_valid_evidence_item(&evidence("unknown", 1, "concrete")));
        assert!(!has_valid_evidence_item(&evidence("n/a", 1, "concrete")));
        assert!(!has_valid_evidence_item(&evidence("s-1", 0, "concrete")));
        assert!(!has_valid_evidence_item(&evidence("s-1", 1, "TBD")));
    }

    #[test]
    fn mechanism_signal_requires_concrete_evidence() {
        let good = json!({
            "summary": "开场上下文不足导致澄清循环",
            "why": [{"hypothesis": "开场上下文不足", "evidence": [evidence("s-1", 1, "请帮我")]}],
        });
        assert!(session_has_mechanism_signal(&good));

        let placeholder_summary = json!({
            "summary": "placeholder",
            "why": [{"hypothesis": "h", "evidence": [evidence("s-1", 1, "x")]}],
        });
        assert!(!session_has_mechanism_signal(&placeholder_summary));

        let blocked = json!({
            "summary": "ok summary",
            "why": [{"hypothesis": "h", "evidence": [evidence("s-1", 1, "x")]}],
            "generated_by": {"engine": "mock", "provider": "api", "run_id": "r"},
        });
        assert!(!session_has_mechanism_signal(&blocked));

        let no_evidence = json!({
            "summary": "ok summary",
            "why": [{"hypothesis": "h", "evidence": []}],
        });
        assert!(!session_has_mechanism_signal(&no_evidence));
    }

    #[test]
    fn compacts_session_with_bounded_fields() {
        let session = json!({
            "session_id": "s-1",
            "created_at": "2026-02-06T10:00:00+00:00",
            "labels": ["kickoff-context-gap", "second"],
            "why": [{
                "hypothesis": "h".repeat(40),
                "confidence": 0.71849,
                "evidence": [evidence("s-1", 3, "请帮我")],
            }],
            "how_to_improve": [{"action": "a".repeat(40), "trigger": "t"}],
        });
        let compact = compact_session_for_incremental(&session);
        assert_eq!(compact["labels"], json!(["kickoff-context-gap"]));
        assert_eq!(compact["mechanism"]["hypothesis"], json!("h".repeat(28)));
        assert_eq!(compact["mechanism"]["confidence"], json!(0.718));
        assert_eq!(compact["mechanism"]["evidence_refs"], json!(["s-1#T3"]));
        assert_eq!(compact["action_ref"], json!("a".repeat(14)));
    }

    #[test]
    fn incremental_input_coverage_is_consistent() {
        let sessions = vec![
            json!({"session_id": "s-1", "created_at": "2026-02-01T00:00:00Z"}),
            json!({"session_id": "s-2", "created_at": "2026-02-02T00:00:00Z"}),
        ];
        let input = build_incremental_input("rolling_30d", "run-1", Some("30d"), None, None, 1, &sessions);
        assert_eq!(input["schema_version"], "incremental-input.v1");
        assert_eq!(input["coverage"]["sessions_total"], 2);
        assert_eq!(input["coverage"]["sessions_with_mechanism"], 2);
        assert_eq!(input["period"]["window"], "30d");
        assert_eq!(input["sessions"].as_array().unwrap().len(), 2);
    }
}
