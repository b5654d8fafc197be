//! Build upsertable report records from a Skill-authored incremental payload.

use chrono::Local;
use convolens_types::dimensions::dimension_rank;
use serde_json::Value;
use std::collections::HashSet;

/// One report record in external-database write shape.
#[derive(Debug, Clone)]
pub struct Report {
    pub dimension: String,
    pub layer: String,
    pub title: String,
    pub period: String,
    pub date: String,
    pub conversations_analyzed: u64,
    pub key_insights: String,
    pub detail_text: String,
    pub detail_lines: Vec<String>,
}

impl Report {
    /// Natural key for deduplication in the external database.
    pub fn key(&self) -> (String, String) {
        (self.dimension.clone(), self.period.clone())
    }

    fn sort_key(&self) -> (usize, String, String, String) {
        (
            dimension_rank(&self.dimension),
            self.period.clone(),
            self.date.clone(),
            self.title.clone(),
        )
    }
}

fn text_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Normalize report detail lines from list-like or newline-joined input.
fn normalize_lines(value: Option<&Value>, max_items: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    match value {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(text) = item.as_str() {
                    let text = text.trim();
                    if !text.is_empty() {
                        lines.push(text.to_string());
                    }
                }
            }
        }
        Some(Value::String(text)) => {
            for raw in text.lines() {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
        }
        _ => {}
    }
    lines.truncate(max_items);
    lines
}

/// Deduplicate detail lines case-insensitively, preserving first-seen order.
fn dedupe_lines(lines: Vec<String>, max_items: usize) -> Vec<String> {
    let mut deduped: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for line in lines {
        let text = line.trim().to_string();
        if text.is_empty() || !seen.insert(text.to_lowercase()) {
            continue;
        }
        deduped.push(text);
        if deduped.len() >= max_items {
            break;
        }
    }
    deduped
}

fn normalize_report_item(
    item: &Value,
    default_period: &str,
    default_date: &str,
    default_conversations: u64,
) -> Option<Report> {
    if !item.is_object() {
        return None;
    }

    let dimension = text_field(item, "dimension");
    let layer = text_field(item, "layer");
    let title = text_field(item, "title");
    let key_insights = text_field(item, "key_insights");
    if dimension.is_empty() || layer.is_empty() || title.is_empty() || key_insights.is_empty() {
        return None;
    }

    let mut period = text_field(item, "period");
    if period.is_empty() {
        period = default_period.to_string();
    }
    let mut date = text_field(item, "date");
    if date.is_empty() {
        date = default_date.to_string();
    }

    let conversations_analyzed = item
        .get("conversations_analyzed")
        .and_then(Value::as_u64)
        .unwrap_or(default_conversations);

    // Scale the detail budget with coverage, bounded to a readable page.
    let max_detail_lines =
        (((default_conversations as f64).sqrt() * 2.0) as usize).clamp(12, 80);
    let mut detail_lines = normalize_lines(item.get("detail_lines"), max_detail_lines * 3);
    if detail_lines.is_empty() {
        detail_lines = normalize_lines(item.get("detail_text"), max_detail_lines * 3);
    }
    let detail_lines = dedupe_lines(detail_lines, max_detail_lines);
    if detail_lines.is_empty() {
        return None;
    }

    let mut detail_text = text_field(item, "detail_text");
    if detail_text.is_empty() {
        detail_text = detail_lines.join("\n");
    }

    Some(Report {
        dimension,
        layer,
        title,
        period,
        date,
        conversations_analyzed,
        key_insights,
        detail_text,
        detail_lines,
    })
}

/// Build report records from the Skill-authored `reports` field only, sorted
/// into canonical dimension order.
pub fn build_reports_from_incremental(incremental: &Value) -> Vec<Report> {
    let Some(reports_raw) = incremental.get("reports").and_then(Value::as_array) else {
        return Vec::new();
    };

    let default_period = {
        let period_id = text_field(incremental, "period_id");
        if !period_id.is_empty() {
            period_id
        } else {
            let week = text_field(incremental, "week");
            if week.is_empty() { "unknown-period".to_string() } else { week }
        }
    };
    let default_date = Local::now().format("%Y-%m-%d").to_string();
    let default_conversations = incremental
        .pointer("/coverage/sessions_with_mechanism")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut reports: Vec<Report> = reports_raw
        .iter()
        .filter_map(|item| {
            normalize_report_item(item, &default_period, &default_date, default_conversations)
        })
        .collect();
    reports.sort_by_key(Report::sort_key);
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn incremental_with_report(report: Value) -> Value {
        json!({
            "schema_version": "incremental-mechanism.v1",
            "period_id": "rolling_30d",
            "coverage": {"sessions_total": 9, "sessions_with_mechanism": 9},
            "reports": [report],
        })
    }

    #[test]
    fn fills_defaults_from_envelope() {
        let incremental = incremental_with_report(json!({
            "dimension": "incremental-root-causes",
            "layer": "L3",
            "title": "根因",
            "key_insights": "根因：开场上下文不足",
            "detail_lines": ["机制：边界不清导致澄清循环"],
        }));
        let reports = build_reports_from_incremental(&incremental);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].period, "rolling_30d");
        assert_eq!(reports[0].conversations_analyzed, 9);
        assert!(!reports[0].date.is_empty());
        assert_eq!(reports[0].detail_text, "机制：边界不清导致澄清循环");
    }

    #[test]
    fn drops_items_missing_required_fields_or_details() {
        let incremental = json!({
            "period_id": "p",
            "reports": [
                {"dimension": "incremental-root-causes", "layer": "L3", "title": "", "key_insights": "x"},
                {"dimension": "incremental-root-causes", "layer": "L3", "title": "t", "key_insights": "x"},
                "not an object",
            ],
        });
        assert!(build_reports_from_incremental(&incremental).is_empty());
    }

    #[test]
    fn splits_detail_text_into_lines_when_lines_absent() {
        let incremental = incremental_with_report(json!({
            "dimension": "incremental-root-causes",
            "layer": "L3",
            "title": "t",
            "key_insights": "k",
            "detail_text": "第一行\n\n第二行\n第一行",
        }));
        let reports = build_reports_from_incremental(&incremental);
        assert_eq!(reports[0].detail_lines, vec!["第一行".to_string(), "第二行".to_string()]);
        // Explicit detail_text is preserved verbatim.
        assert_eq!(reports[0].detail_text, "第一行\n\n第二行\n第一行");
    }

    #[test]
    fn dedupes_lines_case_insensitively() {
        let incremental = incremental_with_report(json!({
            "dimension": "incremental-root-causes",
            "layer": "L3",
            "title": "t",
            "key_insights": "k",
            "detail_lines": ["Insight A", "insight a", "Insight B"],
        }));
        let reports = build_reports_from_incremental(&incremental);
        assert_eq!(
            reports[0].detail_lines,
            vec!["Insight A".to_string(), "Insight B".to_string()]
        );
    }

    #[test]
    fn sorts_by_registry_order() {
        let incremental = json!({
            "period_id": "p",
            "reports": [
                {"dimension": "incremental-compounding", "layer": "L3", "title": "b",
                 "key_insights": "k", "detail_lines": ["x"]},
                {"dimension": "incremental-trigger-chains", "layer": "L2", "title": "a",
                 "key_insights": "k", "detail_lines": ["x"]},
            ],
        });
        let reports = build_reports_from_incremental(&incremental);
        assert_eq!(reports[0].dimension, "incremental-trigger-chains");
        assert_eq!(reports[1].dimension, "incremental-compounding");
    }
}
