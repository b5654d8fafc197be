//! Canonical dimension set for IncrementalMechanismV1 reports.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

/// Ordered from foundational diagnosis to higher-level intervention planning.
pub const DIMENSION_LAYER_PAIRS: [(&str, &str); 11] = [
    ("incremental-trigger-chains", "L2"),
    ("incremental-first-pass-diagnostics", "L2"),
    ("incremental-coverage-gap", "L2"),
    ("incremental-task-stratification", "L2"),
    ("incremental-root-causes", "L3"),
    ("incremental-change-delta", "L3"),
    ("incremental-interventions", "L3"),
    ("incremental-intervention-impact", "L3"),
    ("incremental-validation-loop", "L3"),
    ("incremental-reuse-assets", "L3"),
    ("incremental-compounding", "L3"),
];

static LAYER_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| DIMENSION_LAYER_PAIRS.iter().copied().collect());

static ORDER_INDEX: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    DIMENSION_LAYER_PAIRS
        .iter()
        .enumerate()
        .map(|(index, (dimension, _))| (*dimension, index))
        .collect()
});

/// Expected layer (L2/L3) for a dimension, or None when unsupported.
pub fn expected_layer(dimension: &str) -> Option<&'static str> {
    LAYER_MAP.get(dimension.trim()).copied()
}

pub fn is_supported(dimension: &str) -> bool {
    LAYER_MAP.contains_key(dimension.trim())
}

/// Canonical rank for a dimension; unknown dimensions sort last.
pub fn dimension_rank(dimension: &str) -> usize {
    ORDER_INDEX
        .get(dimension.trim())
        .copied()
        .unwrap_or(DIMENSION_LAYER_PAIRS.len())
}

/// Supported dimension names in lexical order, for error messages.
pub fn supported_dimensions_sorted() -> Vec<&'static str> {
    let mut names: Vec<&'static str> =
        DIMENSION_LAYER_PAIRS.iter().map(|(name, _)| *name).collect();
    names.sort_unstable();
    names
}

fn string_field(report: &Value, key: &str) -> String {
    report
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Sort key: canonical dimension rank, then period, date and title.
fn report_sort_key(report: &Value) -> (usize, String, String, String) {
    let dimension = string_field(report, "dimension");
    (
        dimension_rank(&dimension),
        string_field(report, "period"),
        string_field(report, "date"),
        string_field(report, "title"),
    )
}

/// Return reports sorted by canonical dimension order.
pub fn sort_reports(mut reports: Vec<Value>) -> Vec<Value> {
    reports.sort_by_key(report_sort_key);
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn layers_match_registry() {
        assert_eq!(expected_layer("incremental-trigger-chains"), Some("L2"));
        assert_eq!(expected_layer("incremental-root-causes"), Some("L3"));
        assert_eq!(expected_layer("incremental-unknown"), None);
        assert_eq!(expected_layer("  incremental-compounding  "), Some("L3"));
    }

    #[test]
    fn unknown_dimensions_rank_last() {
        assert_eq!(dimension_rank("incremental-trigger-chains"), 0);
        assert_eq!(dimension_rank("incremental-compounding"), 10);
        assert_eq!(dimension_rank("something-else"), 11);
    }

    #[test]
    fn sort_orders_by_rank_then_period() {
        let reports = vec![
            json!({"dimension": "incremental-compounding", "period": "p"}),
            json!({"dimension": "incremental-unknown", "period": "p"}),
            json!({"dimension": "incremental-root-causes", "period": "b"}),
            json!({"dimension": "incremental-root-causes", "period": "a"}),
        ];
        let sorted = sort_reports(reports);
        assert_eq!(sorted[0]["period"], "a");
        assert_eq!(sorted[1]["period"], "b");
        assert_eq!(sorted[2]["dimension"], "incremental-compounding");
        assert_eq!(sorted[3]["dimension"], "incremental-unknown");
    }
}
