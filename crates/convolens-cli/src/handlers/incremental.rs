//! `diagnose incremental`: derive and persist the period-level aggregate.

use crate::args::IncrementalArgs;
use crate::window::{build_period_id, resolve_window};
use anyhow::Result;
use convolens_engine::{
    build_incremental_input, coerce_incremental_payload, validate_incremental_mechanism,
    validate_session_mechanism,
};
use convolens_skill::{run_incremental, IncrementalRunConfig};
use convolens_store::{
    count_conversations_in_period, filter_sessions_by_period, load_session_sidecars, read_json,
    write_json_if_changed, SkillRoot,
};
use convolens_sync::{prepare_reports, print_dry_run, sync_prepared, NotionClient};
use convolens_types::dimensions::sort_reports;
use convolens_types::util::now_iso;
use convolens_types::INCREMENTAL_SCHEMA;
use serde_json::{json, Value};
use std::path::PathBuf;

pub fn handle(root: &SkillRoot, args: &IncrementalArgs) -> Result<i32> {
    root.ensure_dirs()?;

    let (since, until) = match resolve_window(&args.window, args.since.clone(), args.until.clone())
    {
        Ok(range) => range,
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            return Ok(2);
        }
    };

    let period_id = match &args.period_id {
        Some(period_id) => period_id.clone(),
        None => build_period_id(since.as_deref(), until.as_deref(), Some(&args.window), None),
    };
    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| format!("incremental-{}", period_id));

    let sessions_total =
        count_conversations_in_period(&root.conversations_dir(), since.as_deref(), until.as_deref());

    let sidecars_all = load_session_sidecars(&root.session_insights_dir());
    let valid_sidecars: Vec<Value> = sidecars_all
        .into_iter()
        .filter(|item| validate_session_mechanism(item).is_empty())
        .collect();
    let filtered = filter_sessions_by_period(&valid_sidecars, since.as_deref(), until.as_deref());

    let mut payload = if let Some(result_file) = &args.result_file {
        let result_path = PathBuf::from(result_file);
        if !result_path.is_file() {
            eprintln!("ERROR: result file not found: {}", result_path.display());
            return Ok(2);
        }
        let raw = match read_json(&result_path) {
            Ok(raw) => raw,
            Err(err) => {
                eprintln!("ERROR: failed to read result file: {}", err);
                return Ok(2);
            }
        };
        let Some(payload) = coerce_incremental_payload(&raw) else {
            eprintln!("ERROR: incremental result payload is empty or malformed");
            return Ok(2);
        };
        if let Some(expected) = &args.period_id {
            let payload_period = payload
                .get("period_id")
                .or_else(|| payload.get("week"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if payload_period != expected.as_str() {
                eprintln!(
                    "ERROR: payload period={} does not match --period-id {}",
                    payload_period, expected
                );
                return Ok(2);
            }
        }
        payload
    } else {
        let input_payload = build_incremental_input(
            &period_id,
            &run_id,
            Some(&args.window),
            since.as_deref(),
            until.as_deref(),
            sessions_total,
            &filtered,
        );
        let cfg = IncrementalRunConfig {
            run_id: run_id.clone(),
            jobs_dir: root.jobs_dir(),
            skills_dir: root.skills_dir(),
            provider: args.provider.to_provider(),
            model: args.model.clone(),
            dry_run: args.dry_run,
            timeout_sec: args.timeout_sec,
        };
        let generated_path = match run_incremental(&cfg, &input_payload) {
            Ok(path) => path,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                return Ok(err.exit_code());
            }
        };
        let Some(generated_path) = generated_path else {
            println!(
                "[diagnose-incremental] period={} dry-run (skill runtime preview only)",
                period_id
            );
            return Ok(0);
        };
        if !generated_path.is_file() {
            eprintln!("ERROR: incremental skill result file missing");
            return Ok(2);
        }
        let raw = read_json(&generated_path)?;
        let Some(payload) = coerce_incremental_payload(&raw) else {
            eprintln!("ERROR: incremental skill result payload is empty or malformed");
            return Ok(2);
        };
        payload
    };

    fill_envelope_defaults(
        &mut payload,
        &period_id,
        &run_id,
        since.as_deref(),
        until.as_deref(),
        sessions_total,
        filtered.len(),
    );

    let errors = validate_incremental_mechanism(&payload);
    if !errors.is_empty() {
        eprintln!("ERROR: incremental mechanism validation failed:");
        for msg in &errors {
            eprintln!("  - {}", msg);
        }
        return Ok(1);
    }

    let out_path = root.incremental_sidecar_path(&period_id);
    if args.dry_run {
        println!("[diagnose-incremental] period={} dry-run", period_id);
        println!(
            "[diagnose-incremental] reports={} coverage={}",
            payload.get("reports").and_then(Value::as_array).map_or(0, Vec::len),
            payload.get("coverage").cloned().unwrap_or_else(|| json!({})),
        );
    } else {
        write_json_if_changed(&out_path, &payload)?;
        println!("[diagnose-incremental] written: {}", out_path.display());
    }

    if args.sync_report {
        return sync_report(root, &payload, args.dry_run);
    }

    Ok(0)
}

fn fill_envelope_defaults(
    payload: &mut Value,
    period_id: &str,
    run_id: &str,
    since: Option<&str>,
    until: Option<&str>,
    sessions_total: usize,
    sessions_with_mechanism: usize,
) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };

    obj.entry("schema_version".to_string())
        .or_insert_with(|| json!(INCREMENTAL_SCHEMA));
    obj.entry("period_id".to_string()).or_insert_with(|| json!(period_id));
    let effective_period = obj
        .get("period_id")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .unwrap_or(period_id)
        .to_string();
    obj.entry("week".to_string()).or_insert_with(|| json!(effective_period));
    obj.entry("source_run_id".to_string()).or_insert_with(|| json!(run_id));
    obj.entry("generated_at".to_string()).or_insert_with(|| json!(now_iso()));

    if !obj.get("period").is_some_and(Value::is_object) {
        obj.insert("period".to_string(), json!({}));
    }
    if let Some(period) = obj.get_mut("period").and_then(Value::as_object_mut) {
        let has = |period: &serde_json::Map<String, Value>, key: &str| {
            period
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|value| !value.is_empty())
        };
        if let Some(since) = since {
            if !has(period, "since") {
                period.insert("since".to_string(), json!(since));
            }
        }
        if let Some(until) = until {
            if !has(period, "until") {
                period.insert("until".to_string(), json!(until));
            }
        }
    }

    if !obj.get("coverage").is_some_and(Value::is_object) {
        obj.insert("coverage".to_string(), json!({}));
    }
    if let Some(coverage) = obj.get_mut("coverage").and_then(Value::as_object_mut) {
        coverage
            .entry("sessions_total".to_string())
            .or_insert_with(|| json!(sessions_total));
        coverage
            .entry("sessions_with_mechanism".to_string())
            .or_insert_with(|| json!(sessions_with_mechanism));
    }

    if let Some(reports) = obj.get("reports").and_then(Value::as_array) {
        let objects: Vec<Value> = reports.iter().filter(|item| item.is_object()).cloned().collect();
        obj.insert("reports".to_string(), Value::Array(sort_reports(objects)));
    }
}

/// Hand the validated payload to the report synchronizer.
fn sync_report(root: &SkillRoot, payload: &Value, dry_run: bool) -> Result<i32> {
    let reports = match prepare_reports(payload) {
        Ok(reports) => reports,
        Err(convolens_sync::Error::Validation(errors)) => {
            eprintln!("ERROR: mechanism validation failed:");
            for err in errors {
                eprintln!("  - {}", err);
            }
            return Ok(1);
        }
        Err(convolens_sync::Error::Quality(reasons)) => {
            eprintln!("ERROR: incremental mechanism quality gate failed:");
            for reason in reasons {
                eprintln!("  - {}", reason);
            }
            return Ok(1);
        }
        Err(err) => {
            eprintln!("ERROR: {}", err);
            return Ok(1);
        }
    };

    if dry_run {
        print_dry_run(&reports);
        return Ok(0);
    }

    let config = match convolens_sync::load_config(&root.config_path()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            return Ok(1);
        }
    };
    let Some(db_id) = config.database("analysis_reports").map(str::to_string) else {
        eprintln!("ERROR: analysis_reports database ID missing in config");
        return Ok(1);
    };
    let mut client = match NotionClient::from_config(&config) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            return Ok(1);
        }
    };

    match sync_prepared(&mut client, &db_id, &reports) {
        Ok(()) => Ok(0),
        Err(err) => {
            eprintln!("ERROR: {}", err);
            Ok(1)
        }
    }
}
