//! `run`: the fixed serial pipeline chain.
//!
//! ingest -> enrich -> diagnose backfill -> diagnose incremental (+sync)
//! -> stats sync -> dashboard. External stages are sibling executables under
//! `<root>/scripts/`; the diagnose stages run in-process. Any stage failure
//! halts the chain.

use crate::args::{BackfillArgs, IncrementalArgs, RunArgs, RunMode, SourceArg};
use crate::handlers::{backfill, incremental};
use crate::window::{build_period_id, parse_window_to_since};
use anyhow::Result;
use chrono::Local;
use convolens_store::SkillRoot;
use serde_json::json;
use std::process::Command;

pub fn handle(root: &SkillRoot, args: &RunArgs) -> Result<i32> {
    let started_at = Local::now().to_rfc3339();
    let rc = run_core_chain(root, args)?;
    let finished_at = Local::now().to_rfc3339();

    let summary = json!({
        "schema_version": "pipeline-run-summary.v1",
        "mode": match args.mode { RunMode::Incremental => "incremental", RunMode::Full => "full" },
        "dry_run": args.dry_run,
        "started_at": started_at,
        "finished_at": finished_at,
        "ok": rc == 0,
        "rc": rc,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(rc)
}

fn run_core_chain(root: &SkillRoot, args: &RunArgs) -> Result<i32> {
    let window = match args.mode {
        RunMode::Full => "all-time".to_string(),
        RunMode::Incremental => args.window.clone(),
    };

    // 1) Ingest
    if !args.skip_ingest {
        for script in ["ingest_claude_code", "ingest_codex"] {
            let mut cmd = script_command(root, script);
            if let Some(since) = &args.since {
                cmd.args(["--since", since]);
            }
            let rc = run_stage(script, cmd);
            if rc != 0 {
                return Ok(rc);
            }
        }
    }

    // 2) Enrich
    if !args.skip_enrich {
        let mut cmd = script_command(root, "auto_enricher");
        if let Some(limit) = args.enrich_limit {
            cmd.args(["--limit", &limit.to_string()]);
        }
        let rc = run_stage("enrich_heuristic", cmd);
        if rc != 0 {
            return Ok(rc);
        }
    }

    // 3) Session sidecar backfill
    if !args.skip_backfill {
        let backfill_args = BackfillArgs {
            window: window.clone(),
            since: None,
            until: None,
            source: SourceArg::All,
            limit: args.backfill_limit,
            run_id: args.run_id.clone(),
            provider: args.skill_provider,
            model: args.skill_model.clone(),
            timeout_sec: args.skill_timeout_sec,
            max_workers: args.skill_max_workers,
            force_refresh: args.backfill_force_refresh,
            allow_partial: args.allow_partial_backfill,
            dry_run: args.dry_run,
        };
        let rc = run_in_process("diagnose_backfill", || backfill::handle(root, &backfill_args))?;
        if rc != 0 {
            return Ok(rc);
        }
    }

    // 4) Build incremental mechanism + sync reports
    let incremental_args = IncrementalArgs {
        period_id: None,
        window: window.clone(),
        since: None,
        until: None,
        result_file: None,
        run_id: args.run_id.clone(),
        provider: args.skill_provider,
        model: args.skill_model.clone(),
        timeout_sec: args.skill_timeout_sec,
        sync_report: true,
        dry_run: args.dry_run,
    };
    let rc = run_in_process("diagnose_incremental", || {
        incremental::handle(root, &incremental_args)
    })?;
    if rc != 0 {
        return Ok(rc);
    }

    // 5) Sync tool/domain stats
    let stats_period = match derive_stats_period_label(args.since.as_deref(), &window) {
        Ok(period) => period,
        Err(msg) => {
            eprintln!("[pipeline] step=sync_stats failed to derive period label: {}", msg);
            return Ok(2);
        }
    };
    let mut cmd = script_command(root, "sync_stats");
    cmd.args(["--append", "--period", &stats_period]);
    if args.dry_run {
        cmd.arg("--dry-run");
    }
    let rc = run_stage("sync_stats", cmd);
    if rc != 0 {
        return Ok(rc);
    }

    // 6) Render dashboard
    let mut cmd = script_command(root, "dashboard");
    if let Some(output) = &args.output {
        cmd.args(["--output", output]);
    }
    cmd.args(["--report-limit", &args.report_limit.to_string()]);
    if args.no_notion || args.dry_run {
        cmd.arg("--no-notion");
    }
    let rc = run_stage("dashboard", cmd);
    if rc != 0 {
        return Ok(rc);
    }

    Ok(0)
}

/// Derive the stats period label with the same rule as incremental
/// diagnosis.
fn derive_stats_period_label(since: Option<&str>, window: &str) -> Result<String, String> {
    let mut since_arg = since.map(str::to_string);
    let mut until_arg: Option<String> = None;

    if since_arg.is_none() && !window.is_empty() {
        let parsed = parse_window_to_since(window)?;
        if parsed.is_some() {
            until_arg = Some(convolens_types::util::today().format("%Y-%m-%d").to_string());
        }
        since_arg = parsed;
    }

    Ok(build_period_id(
        since_arg.as_deref(),
        until_arg.as_deref(),
        Some(window),
        None,
    ))
}

fn script_command(root: &SkillRoot, name: &str) -> Command {
    Command::new(root.scripts_dir().join(name))
}

fn run_stage(label: &str, mut cmd: Command) -> i32 {
    println!("[pipeline] step={} start", label);
    println!("[pipeline] exec: {:?}", cmd);
    match cmd.status() {
        Ok(status) if status.success() => {
            println!("[pipeline] step={} done", label);
            0
        }
        Ok(status) => {
            let rc = status.code().unwrap_or(1);
            eprintln!("[pipeline] step={} failed rc={}", label, rc);
            rc
        }
        Err(err) => {
            eprintln!("[pipeline] step={} failed: {}", label, err);
            2
        }
    }
}

fn run_in_process(label: &str, step: impl FnOnce() -> Result<i32>) -> Result<i32> {
    println!("[pipeline] step={} start", label);
    let rc = step()?;
    if rc == 0 {
        println!("[pipeline] step={} done", label);
    } else {
        eprintln!("[pipeline] step={} failed rc={}", label, rc);
    }
    Ok(rc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_period_label_matches_incremental_rule() {
        assert_eq!(
            derive_stats_period_label(None, "all-time").unwrap(),
            "rolling_all-time"
        );
        assert_eq!(
            derive_stats_period_label(Some("2026-01-01"), "30d").unwrap(),
            "2026-01-01_to_today"
        );
        let rolling = derive_stats_period_label(None, "30d").unwrap();
        assert!(rolling.contains("_to_"));
        assert!(derive_stats_period_label(None, "bogus").is_err());
    }
}
