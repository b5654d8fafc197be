use crate::error::Result;
use convolens_types::quality::generated_by_block_reason;
use convolens_types::util::{parse_date, parse_timestamp};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Deterministic JSON rendering: sorted keys (serde_json map order), 2-space
/// indent, UTF-8, trailing newline. Byte-stable across runs so idempotence
/// can be checked with a plain file comparison.
pub fn canonical_json(value: &Value) -> String {
    let mut rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    rendered.push('\n');
    rendered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Write canonical JSON via a temp file in the same directory, then rename.
/// The rename is skipped entirely when the rendered bytes equal the existing
/// file, so re-runs on unchanged data produce zero mutations.
pub fn write_json_if_changed(path: &Path, value: &Value) -> Result<WriteOutcome> {
    let rendered = canonical_json(value);

    let existing = if path.is_file() {
        Some(fs::read_to_string(path)?)
    } else {
        None
    };
    match &existing {
        Some(current) if *current == rendered => return Ok(WriteOutcome::Unchanged),
        _ => {}
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &rendered)?;
    fs::rename(&tmp_path, path)?;

    Ok(if existing.is_some() {
        WriteOutcome::Updated
    } else {
        WriteOutcome::Created
    })
}

pub fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Load all session sidecar files in lexical path order. Malformed files and
/// payloads whose generated_by marks them as simulated output are skipped.
pub fn load_session_sidecars(dir: &Path) -> Vec<Value> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut sidecars = Vec::new();
    for path in paths {
        let Ok(payload) = read_json(&path) else {
            continue;
        };
        if let Some(generated_by) = payload.get("generated_by") {
            if generated_by_block_reason(generated_by).is_some() {
                continue;
            }
        }
        sidecars.push(payload);
    }
    sidecars
}

/// Filter session payloads by created_at date range. The `until` bound is
/// extended by one day so a session created late on the last day of the
/// period still counts as in-period.
pub fn filter_sessions_by_period(sessions: &[Value], since: Option<&str>, until: Option<&str>) -> Vec<Value> {
    let since_dt = since
        .and_then(parse_date)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc());
    let until_dt = until
        .and_then(parse_date)
        .and_then(|d| d.succ_opt())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc());

    sessions
        .iter()
        .filter(|session| {
            let created_at = session
                .get("created_at")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let Some(created) = parse_timestamp(created_at) else {
                return false;
            };
            if let Some(since_dt) = since_dt {
                if created < since_dt {
                    return false;
                }
            }
            if let Some(until_dt) = until_dt {
                if created > until_dt {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn canonical_json_sorts_keys_and_ends_with_newline() {
        let value = json!({"zebra": 1, "alpha": {"nested_z": 1, "nested_a": 2}});
        let rendered = canonical_json(&value);
        assert!(rendered.ends_with('\n'));
        let alpha = rendered.find("\"alpha\"").unwrap();
        let zebra = rendered.find("\"zebra\"").unwrap();
        assert!(alpha < zebra);
    }

    #[test]
    fn write_is_idempotent_on_identical_payload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.json");
        let value = json!({"b": 2, "a": 1});

        assert_eq!(write_json_if_changed(&path, &value).unwrap(), WriteOutcome::Created);
        assert_eq!(write_json_if_changed(&path, &value).unwrap(), WriteOutcome::Unchanged);

        let updated = json!({"b": 3, "a": 1});
        assert_eq!(write_json_if_changed(&path, &updated).unwrap(), WriteOutcome::Updated);

        // No temp file left behind.
        assert!(!temp.path().join("record.json.tmp").exists());
    }

    #[test]
    fn sidecar_loading_skips_malformed_and_blocked() {
        let temp = TempDir::new().unwrap();
        let good = json!({"session_id": "s-1", "generated_by": {"engine": "api", "provider": "api", "run_id": "r"}});
        let blocked = json!({"session_id": "s-2", "generated_by": {"engine": "mock", "provider": "api", "run_id": "r"}});
        fs::write(temp.path().join("a.json"), good.to_string()).unwrap();
        fs::write(temp.path().join("b.json"), blocked.to_string()).unwrap();
        fs::write(temp.path().join("c.json"), "{oops").unwrap();

        let sidecars = load_session_sidecars(temp.path());
        assert_eq!(sidecars.len(), 1);
        assert_eq!(sidecars[0]["session_id"], "s-1");
    }

    #[test]
    fn period_filter_extends_until_by_one_day() {
        let sessions = vec![
            json!({"session_id": "in", "created_at": "2026-02-10T23:00:00Z"}),
            json!({"session_id": "out", "created_at": "2026-02-12T01:00:00Z"}),
            json!({"session_id": "early", "created_at": "2026-01-01T00:00:00Z"}),
            json!({"session_id": "no-date"}),
        ];
        let filtered = filter_sessions_by_period(&sessions, Some("2026-02-01"), Some("2026-02-10"));
        let ids: Vec<&str> = filtered
            .iter()
            .map(|s| s["session_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["in"]);

        // A session at 12:00 on until+1 is still inside the extended bound.
        let sessions = vec![json!({"session_id": "grace", "created_at": "2026-02-11T00:00:00Z"})];
        let filtered = filter_sessions_by_period(&sessions, None, Some("2026-02-10"));
        assert_eq!(filtered.len(), 1);
    }
}
