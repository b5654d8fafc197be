use crate::error::{Error, Result};
use crate::sidecars::{read_json, write_json_if_changed};
use convolens_types::util::now_iso;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Write the per-run bundle (`session_digests.json`) plus a debug hint file.
pub fn write_run_bundle(
    jobs_dir: &Path,
    run_id: &str,
    window: &str,
    source: &str,
    limit: Option<usize>,
    digests: &[Value],
) -> Result<PathBuf> {
    let run_dir = jobs_dir.join(run_id);
    fs::create_dir_all(&run_dir)?;

    let bundle = json!({
        "schema_version": "diagnose-run.v1",
        "run_id": run_id,
        "created_at": now_iso(),
        "window": window,
        "source": source,
        "limit": limit,
        "session_count": digests.len(),
        "sessions": digests,
    });

    let bundle_path = run_dir.join("session_digests.json");
    write_json_if_changed(&bundle_path, &bundle)?;

    let hint = [
        "# Diagnose Run (Internal Debug Bundle)".to_string(),
        String::new(),
        format!("- run_id: `{}`", run_id),
        format!("- sessions: `{}`", digests.len()),
        String::new(),
        "此目录用于故障排查，不是日常运行入口。".to_string(),
        String::new(),
        "## Recommended".to_string(),
        String::new(),
        "请优先使用统一入口：".to_string(),
        "- `convolens run`".to_string(),
        "- `convolens run --mode full`".to_string(),
    ]
    .join("\n");
    fs::write(run_dir.join("README.md"), hint)?;

    Ok(bundle_path)
}

/// Load a diagnose run bundle from the jobs directory.
pub fn load_run_bundle(jobs_dir: &Path, run_id: &str) -> Result<Value> {
    let bundle_path = jobs_dir.join(run_id).join("session_digests.json");
    if !bundle_path.is_file() {
        return Err(Error::NotFound(format!(
            "run bundle not found: {}",
            bundle_path.display()
        )));
    }
    read_json(&bundle_path)
}
