//! `diagnose backfill`: bring session sidecars up to date for a time window.

use crate::args::BackfillArgs;
use crate::window::resolve_window;
use anyhow::Result;
use chrono::Utc;
use convolens_engine::{
    build_session_digest, normalize_session_batch, session_has_mechanism_signal,
    validate_session_mechanism,
};
use convolens_skill::{run_session_batch, SessionBatchConfig};
use convolens_store::{
    load_conversations, read_json, write_json_if_changed, write_run_bundle, ConversationFilter,
    SkillRoot, WriteOutcome,
};
use convolens_types::util::{now_iso, week_label};
use convolens_types::SESSION_SCHEMA;
use serde_json::{json, Value};
use std::path::Path;

pub fn handle(root: &SkillRoot, args: &BackfillArgs) -> Result<i32> {
    root.ensure_dirs()?;

    let (since, until) = match resolve_window(&args.window, args.since.clone(), args.until.clone())
    {
        Ok(range) => range,
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            return Ok(2);
        }
    };

    let filter = ConversationFilter {
        since,
        until,
        source: args.source.filter_value(),
    };
    let mut conversations = load_conversations(&root.conversations_dir(), &filter);
    if let Some(limit) = args.limit {
        if limit > 0 {
            conversations.truncate(limit);
        }
    }
    let checked = conversations.len();

    let targets: Vec<_> = conversations
        .into_iter()
        .filter(|conv| {
            let session_id = conv.session_id.trim();
            !session_id.is_empty() && session_needs_backfill(root, session_id, args.force_refresh)
        })
        .collect();

    if targets.is_empty() {
        println!(
            "[diagnose-backfill] no target sessions (checked={} window={})",
            checked, args.window
        );
        return Ok(0);
    }

    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| format!("backfill-{}", Utc::now().format("%Y%m%dT%H%M%SZ")));

    let digests: Vec<Value> = targets
        .iter()
        .map(|conv| serde_json::to_value(build_session_digest(conv)))
        .collect::<std::result::Result<_, _>>()?;
    write_run_bundle(
        &root.jobs_dir(),
        &run_id,
        &args.window,
        args.source.as_str(),
        args.limit,
        &digests,
    )?;

    println!(
        "[diagnose-backfill] prepared run_id={} targets={} checked={}",
        run_id,
        targets.len(),
        checked
    );

    let cfg = SessionBatchConfig {
        run_id: run_id.clone(),
        jobs_dir: root.jobs_dir(),
        skills_dir: root.skills_dir(),
        provider: args.provider.to_provider(),
        model: args.model.clone(),
        dry_run: args.dry_run,
        timeout_sec: args.timeout_sec,
        allow_partial: args.allow_partial,
        max_workers: args.max_workers,
    };
    if let Err(err) = run_session_batch(&cfg) {
        eprintln!("ERROR: {}", err);
        return Ok(err.exit_code());
    }
    if args.dry_run {
        return Ok(0);
    }

    let result_path = root
        .run_dir(&run_id)
        .join(format!("api_{}_results.json", args.provider.as_str()));
    if !result_path.is_file() {
        eprintln!("ERROR: backfill result file missing: {}", result_path.display());
        return Ok(2);
    }

    apply_session_results(root, &run_id, &result_path, args.allow_partial)
}

/// A sidecar needs backfill when it is missing, unparseable, invalid, or
/// present but without a usable mechanism signal.
fn session_needs_backfill(root: &SkillRoot, session_id: &str, force_refresh: bool) -> bool {
    if force_refresh {
        return true;
    }

    let path = root.session_sidecar_path(session_id);
    if !path.is_file() {
        return true;
    }
    let Ok(payload) = read_json(&path) else {
        return true;
    };
    if !validate_session_mechanism(&payload).is_empty() {
        return true;
    }
    !session_has_mechanism_signal(&payload)
}

/// Validate and persist SessionMechanismV1 payloads from a batch result
/// file. Writes are byte-diffed so re-applying identical results mutates
/// nothing.
pub fn apply_session_results(
    root: &SkillRoot,
    run_id: &str,
    result_path: &Path,
    allow_partial: bool,
) -> Result<i32> {
    root.ensure_dirs()?;

    if !result_path.is_file() {
        eprintln!("ERROR: result file not found: {}", result_path.display());
        return Ok(2);
    }
    let raw_payload = match read_json(result_path) {
        Ok(payload) => payload,
        Err(err) => {
            eprintln!("ERROR: failed to read result file: {}", err);
            return Ok(2);
        }
    };

    let items = normalize_session_batch(&raw_payload);
    if items.is_empty() {
        eprintln!("ERROR: no session mechanism records found in result payload");
        return Ok(2);
    }

    let mut invalid_lines: Vec<String> = Vec::new();
    let mut invalid_records: Vec<Value> = Vec::new();
    let mut valid_items: Vec<Value> = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let mut record = item.as_object().cloned().unwrap_or_default();
        record
            .entry("schema_version".to_string())
            .or_insert_with(|| json!(SESSION_SCHEMA));

        let mut generated_by = record
            .get("generated_by")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        generated_by.entry("engine".to_string()).or_insert_with(|| json!("api"));
        generated_by.entry("provider".to_string()).or_insert_with(|| json!("api"));
        generated_by.entry("model".to_string()).or_insert_with(|| json!("skill"));
        generated_by.entry("run_id".to_string()).or_insert_with(|| json!(run_id));
        generated_by
            .entry("generated_at".to_string())
            .or_insert_with(|| json!(now_iso()));
        record.insert("generated_by".to_string(), Value::Object(generated_by));

        let has_week = record
            .get("week")
            .and_then(Value::as_str)
            .is_some_and(|week| !week.is_empty());
        if !has_week {
            if let Some(created_at) = record.get("created_at").and_then(Value::as_str) {
                record.insert("week".to_string(), json!(week_label(created_at)));
            }
        }
        let has_period = record
            .get("period_id")
            .and_then(Value::as_str)
            .is_some_and(|period| !period.is_empty());
        if !has_period {
            if let Some(week) = record.get("week").and_then(Value::as_str) {
                if !week.is_empty() {
                    record.insert("period_id".to_string(), json!(week));
                }
            }
        }

        let record = Value::Object(record);
        let errors = validate_session_mechanism(&record);
        if !errors.is_empty() {
            let session_id = record
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            invalid_lines.push(format!(
                "index {} session_id={}: {}",
                index,
                session_id,
                errors.join("; ")
            ));
            invalid_records.push(json!({
                "index": index,
                "session_id": session_id,
                "errors": errors,
            }));
            continue;
        }
        valid_items.push(record);
    }

    let run_dir = root.run_dir(run_id);
    std::fs::create_dir_all(&run_dir)?;

    if !invalid_lines.is_empty() && !allow_partial {
        eprintln!("ERROR: session mechanism validation failed:");
        for line in &invalid_lines {
            eprintln!("  - {}", line);
        }
        return Ok(1);
    }

    if !invalid_records.is_empty() && allow_partial {
        let invalid_path = run_dir.join("invalid_session_mechanisms.json");
        write_json_if_changed(
            &invalid_path,
            &json!({
                "schema_version": "diagnose-invalid-session-mechanisms.v1",
                "run_id": run_id,
                "generated_at": now_iso(),
                "invalid_count": invalid_records.len(),
                "invalid_records": invalid_records,
            }),
        )?;
        println!(
            "[diagnose-apply] warning: skipped invalid session mechanisms={}",
            invalid_records.len()
        );
        println!("[diagnose-apply] invalid_details={}", invalid_path.display());
    }

    if valid_items.is_empty() {
        eprintln!("ERROR: no valid session mechanisms after validation");
        return Ok(1);
    }

    let mut created = 0usize;
    let mut updated = 0usize;
    for record in &valid_items {
        let session_id = record
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let out_path = root.session_sidecar_path(session_id);
        match write_json_if_changed(&out_path, record)? {
            WriteOutcome::Created => created += 1,
            WriteOutcome::Updated => updated += 1,
            WriteOutcome::Unchanged => {}
        }
    }

    write_json_if_changed(
        &run_dir.join("apply_summary.json"),
        &json!({
            "schema_version": "diagnose-apply-summary.v1",
            "run_id": run_id,
            "applied_at": now_iso(),
            "result_file": result_path.display().to_string(),
            "records_valid": valid_items.len(),
            "records_invalid": invalid_records.len(),
            "created": created,
            "updated": updated,
        }),
    )?;

    println!("[diagnose-apply] run_id={}", run_id);
    println!(
        "[diagnose-apply] valid={} created={} updated={}",
        valid_items.len(),
        created,
        updated
    );
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use convolens_testing::valid_session_mechanism;
    use tempfile::TempDir;

    fn world() -> (TempDir, SkillRoot) {
        let temp = TempDir::new().unwrap();
        let root = SkillRoot::new(temp.path());
        root.ensure_dirs().unwrap();
        (temp, root)
    }

    fn write_results(root: &SkillRoot, run_id: &str, sessions: Vec<Value>) -> std::path::PathBuf {
        let run_dir = root.run_dir(run_id);
        std::fs::create_dir_all(&run_dir).unwrap();
        let path = run_dir.join("api_claude_cli_results.json");
        let payload = json!({
            "schema_version": "session-mechanism-batch.v1",
            "run_id": run_id,
            "sessions": sessions,
        });
        std::fs::write(&path, payload.to_string()).unwrap();
        path
    }

    #[test]
    fn apply_writes_sidecar_and_summary() {
        let (_temp, root) = world();
        let record = valid_session_mechanism("s-1", "2026-02-06T10:00:00+00:00");
        let result_path = write_results(&root, "run-a", vec![record]);

        let rc = apply_session_results(&root, "run-a", &result_path, false).unwrap();
        assert_eq!(rc, 0);

        let sidecar = read_json(&root.session_sidecar_path("s-1")).unwrap();
        assert!(validate_session_mechanism(&sidecar).is_empty());

        let summary = read_json(&root.run_dir("run-a").join("apply_summary.json")).unwrap();
        assert_eq!(summary["records_valid"], 1);
        assert_eq!(summary["created"], 1);
        assert_eq!(summary["updated"], 0);
    }

    #[test]
    fn second_apply_of_identical_results_mutates_nothing() {
        let (_temp, root) = world();
        let record = valid_session_mechanism("s-1", "2026-02-06T10:00:00+00:00");
        let result_path = write_results(&root, "run-a", vec![record]);

        assert_eq!(apply_session_results(&root, "run-a", &result_path, false).unwrap(), 0);
        let first = std::fs::read_to_string(root.session_sidecar_path("s-1")).unwrap();

        assert_eq!(apply_session_results(&root, "run-a", &result_path, false).unwrap(), 0);
        let second = std::fs::read_to_string(root.session_sidecar_path("s-1")).unwrap();
        assert_eq!(first, second);

        let summary = read_json(&root.run_dir("run-a").join("apply_summary.json")).unwrap();
        assert_eq!(summary["created"], 0);
        assert_eq!(summary["updated"], 0);
    }

    #[test]
    fn missing_week_and_period_are_derived_from_created_at() {
        let (_temp, root) = world();
        let mut record = valid_session_mechanism("s-1", "2026-02-06T10:00:00+00:00");
        record.as_object_mut().unwrap().remove("week");
        let result_path = write_results(&root, "run-a", vec![record]);

        assert_eq!(apply_session_results(&root, "run-a", &result_path, false).unwrap(), 0);
        let sidecar = read_json(&root.session_sidecar_path("s-1")).unwrap();
        assert_eq!(sidecar["week"], "2026-W06");
        assert_eq!(sidecar["period_id"], "2026-W06");
    }

    #[test]
    fn invalid_record_without_allow_partial_blocks_the_batch() {
        let (_temp, root) = world();
        let good = valid_session_mechanism("s-1", "2026-02-06T10:00:00+00:00");
        let mut bad = valid_session_mechanism("s-2", "2026-02-06T10:00:00+00:00");
        bad["why"] = json!([]);
        let result_path = write_results(&root, "run-a", vec![good, bad]);

        let rc = apply_session_results(&root, "run-a", &result_path, false).unwrap();
        assert_eq!(rc, 1);
        assert!(!root.session_sidecar_path("s-1").exists());
        assert!(!root.run_dir("run-a").join("invalid_session_mechanisms.json").exists());
    }

    #[test]
    fn invalid_record_with_allow_partial_is_recorded_and_skipped() {
        let (_temp, root) = world();
        let good = valid_session_mechanism("s-1", "2026-02-06T10:00:00+00:00");
        let mut bad = valid_session_mechanism("s-2", "2026-02-06T10:00:00+00:00");
        bad["why"] = json!([]);
        let result_path = write_results(&root, "run-a", vec![good, bad]);

        let rc = apply_session_results(&root, "run-a", &result_path, true).unwrap();
        assert_eq!(rc, 0);
        assert!(root.session_sidecar_path("s-1").is_file());
        assert!(!root.session_sidecar_path("s-2").exists());

        let invalid = read_json(&root.run_dir("run-a").join("invalid_session_mechanisms.json")).unwrap();
        assert_eq!(invalid["invalid_count"], 1);
        assert_eq!(invalid["invalid_records"][0]["session_id"], "s-2");
    }

    #[test]
    fn empty_result_payload_is_an_invocation_error() {
        let (_temp, root) = world();
        let result_path = write_results(&root, "run-a", vec![]);
        let rc = apply_session_results(&root, "run-a", &result_path, false).unwrap();
        assert_eq!(rc, 2);
    }
}
