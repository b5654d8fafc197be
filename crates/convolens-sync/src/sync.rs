//! Upsert-by-natural-key synchronization into the analysis-reports database.

use crate::client::{blocks, ReportDb};
use crate::error::{Error, Result};
use crate::quality::evaluate_payload_quality;
use crate::reports::{build_reports_from_incremental, Report};
use convolens_engine::validate_incremental_mechanism;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;

static CJK_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{4e00}-\u{9fff}]").unwrap());

type ReportKey = (String, String);

fn contains_cjk(text: &str) -> bool {
    CJK_PATTERN.is_match(text)
}

fn title_text(prop: &Value) -> String {
    let Some(values) = prop.get("title").and_then(Value::as_array) else {
        return String::new();
    };
    let Some(first) = values.first() else {
        return String::new();
    };
    first
        .get("plain_text")
        .and_then(Value::as_str)
        .or_else(|| first.pointer("/text/content").and_then(Value::as_str))
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn select_name(prop: &Value) -> String {
    prop.pointer("/select/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn rich_text_text(prop: &Value) -> String {
    let Some(values) = prop.get("rich_text").and_then(Value::as_array) else {
        return String::new();
    };
    let parts: Vec<String> = values
        .iter()
        .filter_map(|item| {
            let text = item
                .get("plain_text")
                .and_then(Value::as_str)
                .or_else(|| item.pointer("/text/content").and_then(Value::as_str))
                .unwrap_or_default()
                .trim();
            (!text.is_empty()).then(|| text.to_string())
        })
        .collect();
    parts.join(" ").trim().to_string()
}

fn page_sort_key(page: &Value) -> String {
    page.get("last_edited_time")
        .and_then(Value::as_str)
        .or_else(|| page.get("created_time").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// A page superseded by the keeper at the same natural key.
#[derive(Debug, Clone)]
pub struct DuplicatePage {
    pub page_id: String,
    pub key: String,
    pub title: String,
    pub reason: &'static str,
}

/// Index existing pages by `(dimension, period)`, preferring CJK-bearing
/// entries as keepers, then the most recently edited; everything else is a
/// duplicate to archive.
pub fn build_report_index_and_duplicates(
    db: &mut dyn ReportDb,
    db_id: &str,
) -> Result<(HashMap<ReportKey, String>, Vec<DuplicatePage>)> {
    struct PageEntry {
        id: String,
        title: String,
        sort_key: String,
        is_zh: bool,
    }

    let mut grouped: HashMap<ReportKey, Vec<PageEntry>> = HashMap::new();
    for page in db.query_pages(db_id)? {
        let props = page.get("properties").cloned().unwrap_or_else(|| json!({}));
        let dimension = select_name(props.get("Dimension").unwrap_or(&Value::Null));
        let period = select_name(props.get("Period").unwrap_or(&Value::Null));
        if dimension.is_empty() || period.is_empty() {
            continue;
        }
        let id = page
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if id.is_empty() {
            continue;
        }
        let title = title_text(props.get("Title").unwrap_or(&Value::Null));
        let insights = rich_text_text(props.get("Key Insights").unwrap_or(&Value::Null));
        grouped.entry((dimension, period)).or_default().push(PageEntry {
            id,
            is_zh: contains_cjk(&title) || contains_cjk(&insights),
            sort_key: page_sort_key(&page),
            title,
        });
    }

    let mut index: HashMap<ReportKey, String> = HashMap::new();
    let mut duplicates: Vec<DuplicatePage> = Vec::new();
    for (key, items) in grouped {
        let preferred: Vec<&PageEntry> = {
            let zh_items: Vec<&PageEntry> = items.iter().filter(|item| item.is_zh).collect();
            if zh_items.is_empty() {
                items.iter().collect()
            } else {
                zh_items
            }
        };
        let keeper = preferred
            .iter()
            .max_by(|a, b| a.sort_key.cmp(&b.sort_key))
            .map(|item| item.id.clone())
            .unwrap_or_default();
        index.insert(key.clone(), keeper.clone());

        for item in &items {
            if item.id != keeper {
                duplicates.push(DuplicatePage {
                    page_id: item.id.clone(),
                    key: format!("{}|{}", key.0, key.1),
                    title: item.title.clone(),
                    reason: "duplicate_key",
                });
            }
        }
    }
    duplicates.sort_by(|a, b| a.page_id.cmp(&b.page_id));
    Ok((index, duplicates))
}

fn report_properties(report: &Report) -> Value {
    json!({
        "Title": {"title": [{"text": {"content": report.title}}]},
        "Dimension": {"select": {"name": report.dimension}},
        "Layer": {"select": {"name": report.layer}},
        "Period": {"select": {"name": report.period}},
        "Date": {"date": {"start": report.date}},
        "Conversations Analyzed": {"number": report.conversations_analyzed},
        "Key Insights": {"rich_text": [{"text": {"content": report.key_insights}}]},
    })
}

fn build_report_children(report: &Report) -> Vec<Value> {
    let mut children: Vec<Value> = Vec::new();

    if !report.key_insights.trim().is_empty() {
        children.push(blocks::heading("摘要", 3));
        children.push(blocks::paragraph(&report.key_insights));
    }

    children.push(blocks::divider());
    children.push(blocks::heading("详细洞察", 3));

    if !report.detail_lines.is_empty() {
        for line in &report.detail_lines {
            let text = line.trim();
            if !text.is_empty() {
                children.push(blocks::bulleted_list(text));
            }
        }
    } else if !report.detail_text.trim().is_empty() {
        children.push(blocks::paragraph(report.detail_text.trim()));
    } else {
        children.push(blocks::paragraph("暂无可展开的详细洞察。"));
    }

    children
}

/// Upsert one report page. Failures are logged, not propagated, so a single
/// bad page does not halt the loop.
fn write_report(
    db: &mut dyn ReportDb,
    db_id: &str,
    report: &Report,
    index: &mut HashMap<ReportKey, String>,
) -> bool {
    let props = report_properties(report);
    let children = build_report_children(report);
    let key = report.key();
    let existing_page_id = index.get(&key).cloned().filter(|id| !id.is_empty());

    let outcome = (|| -> Result<()> {
        if let Some(page_id) = &existing_page_id {
            db.update_page(page_id, props)?;
            db.clear_page(page_id)?;
            if !children.is_empty() {
                db.append_blocks(page_id, children)?;
            }
        } else {
            let created = db.create_page(db_id, props, children)?;
            if let Some(page_id) = created.get("id").and_then(Value::as_str) {
                if !page_id.trim().is_empty() {
                    index.insert(key, page_id.trim().to_string());
                }
            }
        }
        Ok(())
    })();

    match outcome {
        Ok(()) => true,
        Err(err) => {
            eprintln!("ERROR writing report '{}': {}", report.title, err);
            false
        }
    }
}

fn archive_duplicate_pages(db: &mut dyn ReportDb, duplicates: &[DuplicatePage]) -> (usize, usize) {
    let mut archived = 0;
    let mut failed = 0;
    for item in duplicates {
        if item.page_id.is_empty() {
            continue;
        }
        match db.archive_page(&item.page_id) {
            Ok(()) => archived += 1,
            Err(err) => {
                failed += 1;
                eprintln!("ERROR archiving duplicate page {}: {}", item.page_id, err);
            }
        }
    }
    (archived, failed)
}

/// Validate, quality-gate, and build the report records for a payload.
pub fn prepare_reports(incremental: &Value) -> Result<Vec<Report>> {
    let errors = validate_incremental_mechanism(incremental);
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    let (quality_ok, quality_reasons) = evaluate_payload_quality(incremental);
    if !quality_ok {
        return Err(Error::Quality(quality_reasons));
    }

    Ok(build_reports_from_incremental(incremental))
}

/// Print the dry-run preview lines without touching the database.
pub fn print_dry_run(reports: &[Report]) {
    println!("[sync-reports] dry-run with {} reports", reports.len());
    for report in reports {
        let preview: String = report.key_insights.chars().take(80).collect();
        println!("  - {}: {}", report.title, preview);
    }
}

/// Sync prepared reports: archive duplicates, then upsert each page.
pub fn sync_prepared(db: &mut dyn ReportDb, db_id: &str, reports: &[Report]) -> Result<()> {
    let (mut index, duplicates) = build_report_index_and_duplicates(db, db_id)?;
    if !duplicates.is_empty() {
        let (archived, failed) = archive_duplicate_pages(db, &duplicates);
        println!(
            "[sync-reports] dedupe archived={} failed={} (keep_key=Dimension+Period, prefer=中文)",
            archived, failed
        );
        if failed > 0 {
            return Err(Error::Db("duplicate page archival failed".to_string()));
        }
    }

    let mut written = 0;
    for report in reports {
        if write_report(db, db_id, report, &mut index) {
            written += 1;
        }
    }

    println!("[sync-reports] written {}/{} reports", written, reports.len());
    if written == reports.len() {
        Ok(())
    } else {
        Err(Error::Partial {
            written,
            total: reports.len(),
        })
    }
}

/// Full sync of a validated IncrementalMechanismV1 payload.
pub fn sync_reports_from_incremental(
    incremental: &Value,
    db: &mut dyn ReportDb,
    db_id: &str,
) -> Result<()> {
    let reports = prepare_reports(incremental)?;
    sync_prepared(db, db_id, &reports)
}

/// Load an incremental mechanism payload by period id, or the latest
/// available file; invalid payloads are treated as absent.
pub fn load_incremental_mechanism(dir: &Path, period_id: Option<&str>) -> Option<Value> {
    let target = match period_id {
        Some(period_id) => {
            let candidate = dir.join(format!("{}.json", period_id));
            candidate.is_file().then_some(candidate)
        }
        None => {
            let mut periods: Vec<_> = std::fs::read_dir(dir)
                .ok()?
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
                .collect();
            periods.sort();
            periods.pop()
        }
    }?;

    let payload = convolens_store::read_json(&target).ok()?;
    validate_incremental_mechanism(&payload)
        .is_empty()
        .then_some(payload)
}
