//! Quality gate applied before publishing reports.
//!
//! Stricter than the contract validator: placeholder-looking titles or
//! insights and statistics-only summaries are rejected even when the payload
//! is structurally valid.

use crate::reports::build_reports_from_incremental;
use convolens_types::quality::{contains_placeholder, looks_mechanistic};
use serde_json::Value;

/// Evaluate report payload quality from the Skill-authored reports.
///
/// Returns `(ok, reasons)`; reasons enumerate every failing report.
pub fn evaluate_payload_quality(incremental: &Value) -> (bool, Vec<String>) {
    let mut reasons: Vec<String> = Vec::new();
    let reports = build_reports_from_incremental(incremental);
    if reports.is_empty() {
        reasons.push("no valid skill-authored reports found".to_string());
        return (false, reasons);
    }

    for (idx, report) in reports.iter().enumerate() {
        if contains_placeholder(&report.title) {
            reasons.push(format!("reports[{}] title looks placeholder", idx));
        }
        if contains_placeholder(&report.key_insights) {
            reasons.push(format!("reports[{}] key_insights looks placeholder", idx));
        }

        let non_placeholder_lines: Vec<&String> = report
            .detail_lines
            .iter()
            .filter(|line| !contains_placeholder(line))
            .collect();
        if non_placeholder_lines.is_empty() {
            reasons.push(format!(
                "reports[{}] detail lines are empty or placeholder-only",
                idx
            ));
            continue;
        }

        let mut probe_parts: Vec<&str> = vec![report.key_insights.as_str()];
        probe_parts.extend(non_placeholder_lines.iter().take(8).map(|line| line.as_str()));
        if !looks_mechanistic(&probe_parts.join(" ")) {
            reasons.push(format!(
                "reports[{}] lacks mechanism/action language; avoid statistics-only summary",
                idx
            ));
        }
    }

    (reasons.is_empty(), reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(title: &str, insights: &str, lines: Vec<&str>) -> Value {
        json!({
            "schema_version": "incremental-mechanism.v1",
            "period_id": "rolling_30d",
            "coverage": {"sessions_total": 3, "sessions_with_mechanism": 3},
            "reports": [{
                "dimension": "incremental-root-causes",
                "layer": "L3",
                "title": title,
                "key_insights": insights,
                "detail_lines": lines,
            }],
        })
    }

    #[test]
    fn accepts_mechanistic_content() {
        let (ok, reasons) = evaluate_payload_quality(&payload(
            "增量根因假设",
            "开场上下文不足导致澄清循环。",
            vec!["现象：首轮任务边界不清。", "改进：开场写目标、边界、完成标准。"],
        ));
        assert!(ok, "unexpected reasons: {:?}", reasons);
    }

    #[test]
    fn rejects_placeholder_title_and_insights() {
        let (ok, reasons) = evaluate_payload_quality(&payload(
            "placeholder title",
            "insufficient-evidence",
            vec!["机制：x 导致 y"],
        ));
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("title looks placeholder")));
        assert!(reasons.iter().any(|r| r.contains("key_insights looks placeholder")));
    }

    #[test]
    fn rejects_statistics_only_summary() {
        let (ok, reasons) = evaluate_payload_quality(&payload(
            "周报",
            "17 sessions, 42 tools, 3 domains.",
            vec!["chatgpt: 9", "codex: 8"],
        ));
        assert!(!ok);
        assert!(reasons
            .iter()
            .any(|r| r.contains("lacks mechanism/action language")));
    }

    #[test]
    fn rejects_placeholder_only_detail_lines() {
        let (ok, reasons) = evaluate_payload_quality(&payload(
            "周报",
            "根因：开场上下文不足",
            vec!["TBD", "placeholder"],
        ));
        assert!(!ok);
        assert!(reasons
            .iter()
            .any(|r| r.contains("detail lines are empty or placeholder-only")));
    }

    #[test]
    fn empty_reports_is_a_single_reason() {
        let (ok, reasons) = evaluate_payload_quality(&json!({"reports": []}));
        assert!(!ok);
        assert_eq!(reasons, vec!["no valid skill-authored reports found".to_string()]);
    }

    #[test]
    fn cjk_mechanism_tokens_match_exact_characters() {
        // Full-width punctuation around a token does not defeat the probe,
        // but a paraphrase without any token does.
        let (ok, _) = evaluate_payload_quality(&payload(
            "周报",
            "（根因）：开场上下文不足",
            vec!["细节：补充开场模板"],
        ));
        assert!(ok);

        let (ok, _) = evaluate_payload_quality(&payload(
            "周报",
            "起因说明：开场上下文不足",
            vec!["细节：补充开场模板"],
        ));
        assert!(!ok);
    }
}
