//! Structural + semantic validation of mechanism payloads.
//!
//! Both entry points walk a decoded JSON value and return every detected
//! violation as a human-readable string; an empty list means valid. They
//! never panic and perform no I/O. Callers decide whether partial acceptance
//! is permitted.

use convolens_types::dimensions::{expected_layer, is_supported, supported_dimensions_sorted};
use convolens_types::quality::generated_by_block_reason;
use convolens_types::{INCREMENTAL_SCHEMA, SESSION_SCHEMA};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const MAX_DETAIL_LINES_PER_REPORT: usize = 80;

static EVIDENCE_DUMP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(#t\d+|session[_-]?id|主证据[:：]|辅助证据[:：])").unwrap());

fn non_empty_str(value: &Value) -> bool {
    value.as_str().is_some_and(|s| !s.trim().is_empty())
}

fn field<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    payload.get(key).filter(|v| !v.is_null())
}

fn str_field(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn non_negative_int(value: &Value) -> bool {
    value.as_i64().is_some_and(|n| n >= 0) || value.as_u64().is_some()
}

fn positive_int(value: &Value) -> bool {
    value.as_u64().is_some_and(|n| n > 0)
}

fn validate_evidence(evidence: &Value, index: usize, errors: &mut Vec<String>) {
    if !evidence.get("session_id").is_some_and(non_empty_str) {
        errors.push(format!("evidence[{}].session_id must be non-empty string", index));
    }
    if !evidence.get("turn_id").is_some_and(positive_int) {
        errors.push(format!("evidence[{}].turn_id must be positive integer", index));
    }
    if !evidence.get("snippet").is_some_and(non_empty_str) {
        errors.push(format!("evidence[{}].snippet must be non-empty string", index));
    }
    if let Some(tier) = field(evidence, "tier") {
        let ok = tier.as_str().is_some_and(|t| t == "primary" || t == "supporting");
        if !ok {
            errors.push(format!(
                "evidence[{}].tier must be 'primary' or 'supporting' when present",
                index
            ));
        }
    }
}

/// Validate a SessionMechanismV1 payload.
pub fn validate_session_mechanism(payload: &Value) -> Vec<String> {
    let mut errors: Vec<String> = Vec::new();

    if payload.get("schema_version").and_then(Value::as_str) != Some(SESSION_SCHEMA) {
        errors.push(format!("schema_version must be '{}'", SESSION_SCHEMA));
    }

    if !payload.get("session_id").is_some_and(non_empty_str) {
        errors.push("session_id must be non-empty string".to_string());
    }
    if !payload.get("created_at").is_some_and(non_empty_str) {
        errors.push("created_at must be non-empty string".to_string());
    }

    for key in ["week", "period_id"] {
        if let Some(value) = field(payload, key) {
            if !non_empty_str(value) {
                errors.push(format!("{} must be non-empty string when present", key));
            }
        }
    }

    let what_happened_ok = payload
        .get("what_happened")
        .and_then(Value::as_array)
        .is_some_and(|items| !items.is_empty());
    if !what_happened_ok {
        errors.push("what_happened must be non-empty list".to_string());
    }

    match payload.get("why").and_then(Value::as_array) {
        Some(why_items) if !why_items.is_empty() => {
            for (idx, item) in why_items.iter().enumerate() {
                if !item.is_object() {
                    errors.push(format!("why[{}] must be object", idx));
                    continue;
                }
                if !item.get("hypothesis").is_some_and(non_empty_str) {
                    errors.push(format!("why[{}].hypothesis must be non-empty string", idx));
                }
                if let Some(confidence) = field(item, "confidence") {
                    if !confidence.is_number() {
                        errors.push(format!("why[{}].confidence must be number when present", idx));
                    }
                }
                match item.get("evidence").and_then(Value::as_array) {
                    Some(evidence) if !evidence.is_empty() => {
                        for (ev_idx, ev) in evidence.iter().enumerate() {
                            if !ev.is_object() {
                                errors.push(format!("why[{}].evidence[{}] must be object", idx, ev_idx));
                                continue;
                            }
                            validate_evidence(ev, ev_idx, &mut errors);
                        }
                    }
                    _ => errors.push(format!("why[{}].evidence must be non-empty list", idx)),
                }
            }
        }
        _ => errors.push("why must be non-empty list".to_string()),
    }

    match payload.get("how_to_improve").and_then(Value::as_array) {
        Some(actions) if !actions.is_empty() => {
            for (idx, action) in actions.iter().enumerate() {
                if !action.is_object() {
                    errors.push(format!("how_to_improve[{}] must be object", idx));
                    continue;
                }
                for key in ["trigger", "action", "expected_gain", "validation_window"] {
                    if !action.get(key).is_some_and(non_empty_str) {
                        errors.push(format!("how_to_improve[{}].{} must be non-empty string", idx, key));
                    }
                }
            }
        }
        _ => errors.push("how_to_improve must be non-empty list".to_string()),
    }

    if let Some(labels) = field(payload, "labels") {
        if !labels.is_array() {
            errors.push("labels must be list when present".to_string());
        }
    }

    if !payload.get("summary").is_some_and(non_empty_str) {
        errors.push("summary must be non-empty string".to_string());
    }

    match payload.get("generated_by") {
        Some(generated_by) if generated_by.is_object() => {
            for key in ["engine", "provider", "model", "run_id", "generated_at"] {
                if !generated_by.get(key).is_some_and(non_empty_str) {
                    errors.push(format!("generated_by.{} must be non-empty string", key));
                }
            }
            if let Some(reason) = generated_by_block_reason(generated_by) {
                errors.push(format!("generated_by is blocked: {}", reason));
            }
        }
        _ => errors.push("generated_by must be object".to_string()),
    }

    errors
}

/// Validate an IncrementalMechanismV1 payload.
pub fn validate_incremental_mechanism(payload: &Value) -> Vec<String> {
    let mut errors: Vec<String> = Vec::new();

    if payload.get("schema_version").and_then(Value::as_str) != Some(INCREMENTAL_SCHEMA) {
        errors.push(format!("schema_version must be '{}'", INCREMENTAL_SCHEMA));
    }

    let period_id = str_field(payload, "period_id");
    let week = str_field(payload, "week");
    if period_id.is_empty() && week.is_empty() {
        errors.push("period_id or week must be provided".to_string());
    }

    if let Some(period) = field(payload, "period") {
        match period.as_object() {
            Some(map) => {
                for key in ["since", "until"] {
                    if map.contains_key(key) && !map.get(key).is_some_and(non_empty_str) {
                        errors.push(format!("period.{} must be non-empty string when present", key));
                    }
                }
            }
            None => errors.push("period must be object when present".to_string()),
        }
    }

    match payload.get("reports").and_then(Value::as_array) {
        Some(reports) if !reports.is_empty() => {
            let mut seen_report_keys: HashSet<(String, String)> = HashSet::new();
            for (idx, item) in reports.iter().enumerate() {
                if !item.is_object() {
                    errors.push(format!("reports[{}] must be object", idx));
                    continue;
                }
                for key in ["dimension", "layer", "title", "key_insights"] {
                    if !item.get(key).is_some_and(non_empty_str) {
                        errors.push(format!("reports[{}].{} must be non-empty string", idx, key));
                    }
                }

                let dimension = str_field(item, "dimension");
                let layer = str_field(item, "layer");
                if !dimension.is_empty() && !is_supported(&dimension) {
                    errors.push(format!(
                        "reports[{}].dimension must be one of [{}]",
                        idx,
                        supported_dimensions_sorted().join(", ")
                    ));
                }
                if let Some(expected) = expected_layer(&dimension) {
                    if !layer.is_empty() && layer != expected {
                        errors.push(format!(
                            "reports[{}].layer must be '{}' for dimension '{}'",
                            idx, expected, dimension
                        ));
                    }
                }

                for key in ["period", "date"] {
                    if let Some(value) = field(item, key) {
                        if !non_empty_str(value) {
                            errors.push(format!(
                                "reports[{}].{} must be non-empty string when present",
                                idx, key
                            ));
                        }
                    }
                }
                let report_period = {
                    let own = str_field(item, "period");
                    if !own.is_empty() {
                        own
                    } else if !period_id.is_empty() {
                        period_id.clone()
                    } else {
                        week.clone()
                    }
                };
                if !dimension.is_empty() && !report_period.is_empty() {
                    if !seen_report_keys.insert((dimension.clone(), report_period.clone())) {
                        errors.push(format!(
                            "duplicate report key detected for dimension+period: {}+{}",
                            dimension, report_period
                        ));
                    }
                }

                if let Some(conv) = field(item, "conversations_analyzed") {
                    if !non_negative_int(conv) {
                        errors.push(format!(
                            "reports[{}].conversations_analyzed must be non-negative integer when present",
                            idx
                        ));
                    }
                }

                let detail_lines = item.get("detail_lines");
                let has_lines = detail_lines
                    .and_then(Value::as_array)
                    .is_some_and(|lines| lines.iter().any(non_empty_str));
                let has_text = item.get("detail_text").is_some_and(non_empty_str);
                if !has_lines && !has_text {
                    errors.push(format!("reports[{}] requires detail_lines or detail_text", idx));
                }

                if let Some(lines) = detail_lines.and_then(Value::as_array) {
                    let normalized: Vec<&str> = lines
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .collect();
                    if normalized.len() > MAX_DETAIL_LINES_PER_REPORT {
                        errors.push(format!(
                            "reports[{}].detail_lines has {} lines; expected aggregated insights <= {}",
                            idx,
                            normalized.len(),
                            MAX_DETAIL_LINES_PER_REPORT
                        ));
                    }
                    if normalized.len() >= 20 {
                        let evidence_like = normalized
                            .iter()
                            .filter(|line| EVIDENCE_DUMP_PATTERN.is_match(line))
                            .count();
                        if evidence_like as f64 / normalized.len() as f64 >= 0.7 {
                            errors.push(format!(
                                "reports[{}] looks like per-session evidence dump; \
                                 aggregate into mechanism-level insights",
                                idx
                            ));
                        }
                    }
                }
            }
        }
        _ => errors.push("reports must be non-empty list".to_string()),
    }

    match payload.get("coverage") {
        Some(coverage) if coverage.is_object() => {
            for key in ["sessions_total", "sessions_with_mechanism"] {
                if !coverage.get(key).is_some_and(non_negative_int) {
                    errors.push(format!("coverage.{} must be non-negative integer", key));
                }
            }
            let total = coverage.get("sessions_total").and_then(Value::as_i64);
            let with_mechanism = coverage.get("sessions_with_mechanism").and_then(Value::as_i64);
            if let (Some(total), Some(with_mechanism)) = (total, with_mechanism) {
                if with_mechanism > total {
                    errors.push(
                        "coverage.sessions_with_mechanism cannot exceed coverage.sessions_total"
                            .to_string(),
                    );
                }
            }
        }
        _ => errors.push("coverage must be object".to_string()),
    }

    if let Some(what_happened) = field(payload, "what_happened") {
        if !what_happened.is_array() {
            errors.push("what_happened must be list when present".to_string());
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_session() -> Value {
        json!({
            "schema_version": "session-mechanism.v1",
            "session_id": "s-1",
            "created_at": "2026-02-06T10:00:00+00:00",
            "week": "2026-W06",
            "summary": "summary",
            "what_happened": ["fact"],
            "why": [{
                "hypothesis": "hyp",
                "confidence": 0.7,
                "evidence": [{
                    "session_id": "s-1",
                    "turn_id": 1,
                    "snippet": "evidence text",
                }],
            }],
            "how_to_improve": [{
                "trigger": "trigger",
                "action": "action",
                "expected_gain": "gain",
                "validation_window": "next-7-days",
            }],
            "labels": ["scope"],
            "generated_by": {
                "engine": "api",
                "provider": "claude_cli",
                "model": "skill",
                "run_id": "run-1",
                "generated_at": "2026-02-06T10:00:00+00:00",
            },
        })
    }

    fn valid_incremental() -> Value {
        json!({
            "schema_version": "incremental-mechanism.v1",
            "period_id": "rolling_30d",
            "week": "rolling_30d",
            "generated_at": "2026-02-06T11:00:00+00:00",
            "source_run_id": "run-1",
            "coverage": {
                "sessions_total": 1,
                "sessions_with_mechanism": 1,
            },
            "reports": [{
                "dimension": "incremental-root-causes",
                "layer": "L3",
                "title": "增量根因假设 - rolling_30d",
                "key_insights": "开场上下文不足导致澄清循环。",
                "detail_lines": [
                    "现象：首轮任务边界不清，出现往返澄清。",
                    "改进：开场写目标、边界、完成标准。",
                ],
                "conversations_analyzed": 1,
                "period": "rolling_30d",
                "date": "2026-02-06",
            }],
        })
    }

    #[test]
    fn accepts_valid_session_payload() {
        assert!(validate_session_mechanism(&valid_session()).is_empty());
    }

    #[test]
    fn rejects_wrong_schema_version() {
        let mut payload = valid_session();
        payload["schema_version"] = json!("session-mechanism.v2");
        let errors = validate_session_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("schema_version")));
    }

    #[test]
    fn requires_evidence() {
        let mut payload = valid_session();
        payload["why"][0]["evidence"] = json!([]);
        let errors = validate_session_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("evidence")));
    }

    #[test]
    fn rejects_zero_or_string_turn_id() {
        let mut payload = valid_session();
        payload["why"][0]["evidence"][0]["turn_id"] = json!(0);
        let errors = validate_session_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("turn_id must be positive integer")));

        let mut payload = valid_session();
        payload["why"][0]["evidence"][0]["turn_id"] = json!("1");
        let errors = validate_session_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("turn_id must be positive integer")));
    }

    #[test]
    fn rejects_invalid_tier() {
        let mut payload = valid_session();
        payload["why"][0]["evidence"][0]["tier"] = json!("tertiary");
        let errors = validate_session_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("tier")));

        let mut payload = valid_session();
        payload["why"][0]["evidence"][0]["tier"] = json!("primary");
        assert!(validate_session_mechanism(&payload).is_empty());
    }

    #[test]
    fn blocks_manual_generated_by() {
        let mut payload = valid_session();
        payload["generated_by"]["engine"] = json!("manual");
        payload["generated_by"]["provider"] = json!("skill-manual");
        payload["generated_by"]["run_id"] = json!("replace-mock-sidecars-20260207");
        let errors = validate_session_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("generated_by is blocked")));
    }

    #[test]
    fn reports_every_violation() {
        let payload = json!({"schema_version": "session-mechanism.v1"});
        let errors = validate_session_mechanism(&payload);
        assert!(errors.len() >= 5);
        assert!(errors.iter().any(|e| e.contains("session_id")));
        assert!(errors.iter().any(|e| e.contains("summary")));
        assert!(errors.iter().any(|e| e.contains("generated_by must be object")));
    }

    #[test]
    fn accepts_valid_incremental_payload() {
        assert!(validate_incremental_mechanism(&valid_incremental()).is_empty());
    }

    #[test]
    fn requires_reports() {
        let mut payload = valid_incremental();
        payload["reports"] = json!([]);
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("reports")));
    }

    #[test]
    fn requires_period_or_week() {
        let mut payload = valid_incremental();
        payload.as_object_mut().unwrap().remove("period_id");
        payload.as_object_mut().unwrap().remove("week");
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("period_id or week")));
    }

    #[test]
    fn rejects_invalid_coverage_ratio() {
        let mut payload = valid_incremental();
        payload["coverage"]["sessions_total"] = json!(1);
        payload["coverage"]["sessions_with_mechanism"] = json!(2);
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("cannot exceed")));
    }

    #[test]
    fn rejects_unknown_dimension() {
        let mut payload = valid_incremental();
        payload["reports"][0]["dimension"] = json!("incremental-unknown");
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("dimension must be one of")));
    }

    #[test]
    fn rejects_layer_mismatch() {
        let mut payload = valid_incremental();
        payload["reports"][0]["dimension"] = json!("incremental-task-stratification");
        payload["reports"][0]["layer"] = json!("L3");
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("layer must be 'L2'")));
    }

    #[test]
    fn rejects_duplicate_report_key() {
        let mut payload = valid_incremental();
        let report = payload["reports"][0].clone();
        payload["reports"].as_array_mut().unwrap().push(report);
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("duplicate report key")));
    }

    #[test]
    fn rejects_evidence_dump_detail_lines() {
        let mut payload = valid_incremental();
        let lines: Vec<String> = (1..=20).map(|i| format!("s-{} #t{} 主证据：xyz", i, i)).collect();
        payload["reports"][0]["detail_lines"] = json!(lines);
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("evidence dump")));
    }

    #[test]
    fn rejects_oversized_detail_lines() {
        let mut payload = valid_incremental();
        let lines: Vec<String> = (0..81).map(|i| format!("洞察 {}", i)).collect();
        payload["reports"][0]["detail_lines"] = json!(lines);
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("expected aggregated insights <= 80")));
    }

    #[test]
    fn requires_detail_lines_or_text() {
        let mut payload = valid_incremental();
        payload["reports"][0].as_object_mut().unwrap().remove("detail_lines");
        let errors = validate_incremental_mechanism(&payload);
        assert!(errors.iter().any(|e| e.contains("requires detail_lines or detail_text")));

        payload["reports"][0]["detail_text"] = json!("机制说明文本");
        assert!(validate_incremental_mechanism(&payload).is_empty());
    }
}
