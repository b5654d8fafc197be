//! `doctor`: non-mutating health probe over the skill root.

use anyhow::Result;
use chrono::Local;
use convolens_engine::{validate_incremental_mechanism, validate_session_mechanism};
use convolens_store::SkillRoot;
use owo_colors::OwoColorize;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

struct Check {
    name: &'static str,
    ok: bool,
    detail: Value,
}

pub fn handle(root: &SkillRoot, json_mode: bool) -> Result<i32> {
    let mut checks: Vec<Check> = Vec::new();

    let config_path = root.config_path();
    checks.push(Check {
        name: "config_exists",
        ok: config_path.is_file(),
        detail: json!(config_path.display().to_string()),
    });
    let data_dir = root.conversations_dir();
    checks.push(Check {
        name: "data_dir_exists",
        ok: data_dir.is_dir(),
        detail: json!(data_dir.display().to_string()),
    });
    let session_dir = root.session_insights_dir();
    checks.push(Check {
        name: "insights_session_dir_exists",
        ok: session_dir.is_dir(),
        detail: json!(session_dir.display().to_string()),
    });
    let incremental_dir = root.incremental_insights_dir();
    checks.push(Check {
        name: "insights_incremental_dir_exists",
        ok: incremental_dir.is_dir(),
        detail: json!(incremental_dir.display().to_string()),
    });

    let mut files = 0usize;
    let mut schema_v12 = 0usize;
    let mut llm_meta = 0usize;
    let mut malformed = 0usize;
    for payload in json_files(&data_dir) {
        files += 1;
        let Some(conv) = payload else {
            malformed += 1;
            continue;
        };
        if conv.get("schema_version").and_then(Value::as_str) == Some("1.2") {
            schema_v12 += 1;
        }
        let has_llm_metadata = conv
            .pointer("/metadata/llm_metadata")
            .is_some_and(|value| match value {
                Value::Object(map) => !map.is_empty(),
                Value::Null => false,
                _ => true,
            });
        if has_llm_metadata {
            llm_meta += 1;
        }
    }

    let valid_conversation_files = files.saturating_sub(malformed);
    checks.push(Check {
        name: "conversation_files",
        ok: files > 0,
        detail: json!(files),
    });
    checks.push(Check {
        name: "schema_v12_coverage",
        ok: files == 0 || schema_v12 == valid_conversation_files,
        detail: json!({"v12": schema_v12, "valid": valid_conversation_files}),
    });
    checks.push(Check {
        name: "llm_metadata_coverage",
        ok: files == 0 || llm_meta == valid_conversation_files,
        detail: json!({"with_llm_metadata": llm_meta, "valid": valid_conversation_files}),
    });
    checks.push(Check {
        name: "malformed_json",
        ok: malformed == 0,
        detail: json!(malformed),
    });

    let session_health = contract_health(&session_dir, validate_session_mechanism);
    checks.push(Check {
        name: "session_mechanism_contract",
        ok: session_health["malformed"] == json!(0) && session_health["invalid"] == json!(0),
        detail: session_health,
    });
    let incremental_health = contract_health(&incremental_dir, validate_incremental_mechanism);
    checks.push(Check {
        name: "incremental_mechanism_contract",
        ok: incremental_health["malformed"] == json!(0) && incremental_health["invalid"] == json!(0),
        detail: incremental_health,
    });

    let overall_ok = checks.iter().all(|check| check.ok);

    if json_mode {
        let report = json!({
            "timestamp": Local::now().to_rfc3339(),
            "overall_ok": overall_ok,
            "checks": checks
                .iter()
                .map(|check| json!({"name": check.name, "ok": check.ok, "detail": check.detail}))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", "=".repeat(60));
        println!("Pipeline Doctor");
        println!("{}", "=".repeat(60));
        for check in &checks {
            if check.ok {
                println!("[{}] {}: {}", "OK".green(), check.name, check.detail);
            } else {
                println!("[{}] {}: {}", "FAIL".red(), check.name, check.detail);
            }
        }
    }

    Ok(if overall_ok { 0 } else { 1 })
}

/// Yield `Some(payload)` per parseable JSON file, `None` per malformed one.
fn json_files(dir: &Path) -> Vec<Option<Value>> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    paths.sort();
    paths
        .into_iter()
        .map(|path| {
            fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_json::from_str(&content).ok())
        })
        .collect()
}

fn contract_health(dir: &Path, validate: fn(&Value) -> Vec<String>) -> Value {
    let mut total = 0usize;
    let mut malformed = 0usize;
    let mut invalid = 0usize;
    for payload in json_files(dir) {
        total += 1;
        match payload {
            Some(payload) => {
                if !validate(&payload).is_empty() {
                    invalid += 1;
                }
            }
            None => malformed += 1,
        }
    }
    json!({"total": total, "malformed": malformed, "invalid": invalid})
}
