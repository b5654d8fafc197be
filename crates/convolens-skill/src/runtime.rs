//! Batch and aggregation orchestration on top of the provider backends.

use crate::backend::{InferError, InferKind, ProviderBackend, SkillBackend};
use crate::error::{Error, Result};
use crate::pool::map_indexed;
use crate::prompt::{load_incremental_skill_bundle, load_session_skill};
use crate::provider::Provider;
use convolens_engine::{coerce_incremental_payload, normalize_session_output, RunContext};
use convolens_store::{load_run_bundle, write_json_if_changed};
use convolens_types::util::now_iso;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

const INCREMENTAL_CHUNK_SIZE: usize = 24;

const CHUNK_POSTAMBLE: &str = "[分片执行约束]\n\
                               - 当前输入仅代表全量会话中的一个分片。\n\
                               - 只基于当前分片产出中间机制报告。\n\
                               - 不要假设未出现的数据。";

const MERGE_POSTAMBLE: &str = "[分片聚合约束]\n\
                               - 当前输入包含 chunk_reports（分片中间结果）。\n\
                               - 你必须基于 chunk_reports 做全局去重、合并和层级收敛。\n\
                               - 最终输出仍必须是 IncrementalMechanismV1。";

#[derive(Debug, Clone)]
pub struct SessionBatchConfig {
    pub run_id: String,
    pub jobs_dir: PathBuf,
    pub skills_dir: PathBuf,
    pub provider: Provider,
    pub model: Option<String>,
    pub dry_run: bool,
    pub timeout_sec: u64,
    pub allow_partial: bool,
    pub max_workers: usize,
}

impl SessionBatchConfig {
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    fn run_dir(&self) -> PathBuf {
        self.jobs_dir.join(&self.run_id)
    }
}

/// Run the per-session Skill over a prepared run bundle.
///
/// Writes a preview file, then (unless dry-run) fans inference out over a
/// bounded worker pool and persists `api_<provider>_results.json` plus an
/// errors file when some sessions failed.
pub fn run_session_batch(cfg: &SessionBatchConfig) -> Result<()> {
    let run_dir = cfg.run_dir();
    std::fs::create_dir_all(&run_dir)?;

    let bundle = load_run_bundle(&cfg.jobs_dir, &cfg.run_id).map_err(|err| match err {
        convolens_store::Error::NotFound(msg) => Error::Invocation(msg),
        other => Error::Store(other),
    })?;
    let sessions: Vec<Value> = bundle
        .get("sessions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let model = cfg.resolved_model();
    let preview_path = run_dir.join(format!("api_{}_preview.json", cfg.provider));
    let preview = json!({
        "schema_version": "diagnose-api-preview.v1",
        "run_id": cfg.run_id,
        "provider": cfg.provider.as_str(),
        "model": model,
        "dry_run": cfg.dry_run,
        "session_count": sessions.len(),
        "generated_at": now_iso(),
        "note": "API execution preview. Non-dry-run requires valid provider credentials.",
    });
    write_json_if_changed(&preview_path, &preview)?;

    if cfg.dry_run {
        println!("[diagnose-run] api dry-run preview: {}", preview_path.display());
        return Ok(());
    }

    let skill_prompt = load_session_skill(&cfg.skills_dir)?;
    let backend = ProviderBackend::new(cfg.provider, model, cfg.timeout_sec)?;
    execute_session_batch(cfg, &skill_prompt, &sessions, &backend)
}

/// Backend-injectable core of the session pass; `run_session_batch` wires in
/// the real provider backend after the dry-run gate.
pub fn execute_session_batch(
    cfg: &SessionBatchConfig,
    skill_prompt: &str,
    sessions: &[Value],
    backend: &dyn SkillBackend,
) -> Result<()> {
    let run_dir = cfg.run_dir();
    std::fs::create_dir_all(&run_dir)?;
    let model = cfg.resolved_model();

    let session_items: Vec<&Value> = sessions
        .iter()
        .filter(|digest| {
            digest
                .get("session_id")
                .and_then(Value::as_str)
                .is_some_and(|sid| !sid.is_empty())
        })
        .collect();
    if session_items.is_empty() {
        return Err(Error::Inference("no valid sessions in run bundle".to_string()));
    }

    let ctx = RunContext {
        run_id: cfg.run_id.clone(),
        provider: cfg.provider.as_str().to_string(),
        model: model.clone(),
        engine: "api".to_string(),
    };

    let total = session_items.len();
    let completed = AtomicUsize::new(0);
    let outcomes: Vec<std::result::Result<Value, (String, InferError)>> =
        map_indexed(&session_items, cfg.max_workers, |_, digest| {
            let session_id = digest
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let outcome = backend.infer(InferKind::Session, skill_prompt, digest);

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if done == 1 || done % 10 == 0 || done == total {
                println!(
                    "[diagnose-run] provider={} progress={}/{}",
                    cfg.provider, done, total
                );
            }

            match outcome {
                Ok(raw) => {
                    let normalized = normalize_session_output(&raw, digest, &ctx);
                    serde_json::to_value(&normalized)
                        .map_err(|err| (session_id, InferError::new(format!("serialize failed: {}", err))))
                }
                Err(err) => Err((session_id, err)),
            }
        });

    let mut ordered_results: Vec<Value> = Vec::new();
    let mut failed_sessions: Vec<Value> = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(record) => ordered_results.push(record),
            Err((session_id, err)) => {
                failed_sessions.push(json!({"session_id": session_id, "error": err.to_string()}));
            }
        }
    }

    let result_path = run_dir.join(format!("api_{}_results.json", cfg.provider));
    let result_payload = json!({
        "schema_version": "session-mechanism-batch.v1",
        "run_id": cfg.run_id,
        "sessions": ordered_results,
    });
    write_json_if_changed(&result_path, &result_payload)?;

    if !failed_sessions.is_empty() {
        let errors_path = run_dir.join(format!("api_{}_errors.json", cfg.provider));
        let errors_payload = json!({
            "schema_version": "diagnose-api-errors.v1",
            "run_id": cfg.run_id,
            "provider": cfg.provider.as_str(),
            "model": model,
            "failed_sessions": failed_sessions,
        });
        write_json_if_changed(&errors_path, &errors_payload)?;
    }

    let preview_path = run_dir.join(format!("api_{}_preview.json", cfg.provider));
    println!("[diagnose-run] api preview: {}", preview_path.display());
    println!("[diagnose-run] api results: {}", result_path.display());
    if !failed_sessions.is_empty() {
        println!("[diagnose-run] api failed_sessions={}", failed_sessions.len());
        if !cfg.allow_partial {
            return Err(Error::Inference(
                "partial API failures detected; use --allow-partial only when explicitly accepted"
                    .to_string(),
            ));
        }
    }
    if ordered_results.is_empty() {
        return Err(Error::Inference("no session mechanisms generated".to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct IncrementalRunConfig {
    pub run_id: String,
    pub jobs_dir: PathBuf,
    pub skills_dir: PathBuf,
    pub provider: Provider,
    pub model: Option<String>,
    pub dry_run: bool,
    pub timeout_sec: u64,
}

impl IncrementalRunConfig {
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    fn run_dir(&self) -> PathBuf {
        self.jobs_dir.join(&self.run_id)
    }
}

/// Run provider-backed incremental mechanism inference.
///
/// Returns the result file path, or None on dry-run.
pub fn run_incremental(cfg: &IncrementalRunConfig, incremental_input: &Value) -> Result<Option<PathBuf>> {
    let run_dir = cfg.run_dir();
    std::fs::create_dir_all(&run_dir)?;

    let model = cfg.resolved_model();
    let (skill_prompt, skill_files) = load_incremental_skill_bundle(&cfg.skills_dir)?;

    write_json_if_changed(&run_dir.join("incremental_input.json"), incremental_input)?;

    let preview_path = run_dir.join(format!("incremental_api_{}_preview.json", cfg.provider));
    let preview = json!({
        "schema_version": "diagnose-incremental-preview.v1",
        "run_id": cfg.run_id,
        "provider": cfg.provider.as_str(),
        "model": model,
        "dry_run": cfg.dry_run,
        "period_id": incremental_input.get("period_id").and_then(Value::as_str).unwrap_or_default(),
        "sessions_with_mechanism": incremental_input
            .pointer("/coverage/sessions_with_mechanism")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        "skill_files": skill_files,
        "generated_at": now_iso(),
        "note": "Incremental mechanism inference preview.",
    });
    write_json_if_changed(&preview_path, &preview)?;

    if cfg.dry_run {
        println!(
            "[diagnose-incremental] api dry-run preview: {}",
            preview_path.display()
        );
        return Ok(None);
    }

    let backend = ProviderBackend::new(cfg.provider, model, cfg.timeout_sec)?;
    let result_path = execute_incremental(cfg, &skill_prompt, incremental_input, &backend)?;
    Ok(Some(result_path))
}

/// Backend-injectable core of the incremental pass: chunked execution with a
/// final merge call when the session list exceeds the chunk size.
pub fn execute_incremental(
    cfg: &IncrementalRunConfig,
    skill_prompt: &str,
    incremental_input: &Value,
    backend: &dyn SkillBackend,
) -> Result<PathBuf> {
    let run_dir = cfg.run_dir();
    std::fs::create_dir_all(&run_dir)?;

    let session_items: Vec<Value> = incremental_input
        .get("sessions")
        .and_then(Value::as_array)
        .map(|sessions| sessions.iter().filter(|item| item.is_object()).cloned().collect())
        .unwrap_or_default();

    let infer = |prompt: &str, payload: &Value| -> Result<Value> {
        backend
            .infer(InferKind::Incremental, prompt, payload)
            .map_err(|err| Error::Inference(format!("incremental api inference failed: {}", err)))
    };

    let result_payload = if session_items.len() <= INCREMENTAL_CHUNK_SIZE {
        infer(skill_prompt, incremental_input)?
    } else {
        let total_chunks = session_items.len().div_ceil(INCREMENTAL_CHUNK_SIZE);
        let chunk_prompt = format!("{}\n\n{}", skill_prompt, CHUNK_POSTAMBLE);
        let mut chunk_reports: Vec<Value> = Vec::with_capacity(total_chunks);

        for (chunk_idx, chunk) in session_items.chunks(INCREMENTAL_CHUNK_SIZE).enumerate() {
            let mut chunk_input = incremental_input.clone();
            chunk_input["sessions"] = Value::Array(chunk.to_vec());
            let mut coverage = chunk_input
                .get("coverage")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_else(Map::new);
            coverage.insert("sessions_with_mechanism".to_string(), json!(chunk.len()));
            chunk_input["coverage"] = Value::Object(coverage);

            let raw_chunk = infer(&chunk_prompt, &chunk_input)?;
            let chunk_payload = coerce_incremental_payload(&raw_chunk).ok_or_else(|| {
                Error::Inference(format!(
                    "incremental api inference failed: chunk {}/{} returned empty payload",
                    chunk_idx + 1,
                    total_chunks
                ))
            })?;

            let chunk_file = run_dir.join(format!(
                "incremental_chunk_{:02}_of_{:02}.json",
                chunk_idx + 1,
                total_chunks
            ));
            write_json_if_changed(&chunk_file, &chunk_payload)?;

            let reports = chunk_payload
                .get("reports")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            println!(
                "[diagnose-incremental] chunk={}/{} reports={}",
                chunk_idx + 1,
                total_chunks,
                reports.len()
            );
            chunk_reports.push(json!({
                "chunk_id": format!("{}/{}", chunk_idx + 1, total_chunks),
                "coverage": chunk_payload.get("coverage").and_then(Value::as_object).cloned().unwrap_or_default(),
                "reports": reports,
            }));
        }

        let mut merge_input = incremental_input.clone();
        merge_input["sessions"] = Value::Array(Vec::new());
        merge_input["chunk_reports"] = Value::Array(chunk_reports);
        let merge_prompt = format!("{}\n\n{}", skill_prompt, MERGE_POSTAMBLE);
        infer(&merge_prompt, &merge_input)?
    };

    let result_path = run_dir.join(format!("incremental_api_{}_result.json", cfg.provider));
    write_json_if_changed(&result_path, &result_payload)?;
    let preview_path = run_dir.join(format!("incremental_api_{}_preview.json", cfg.provider));
    println!("[diagnose-incremental] api preview: {}", preview_path.display());
    println!("[diagnose-incremental] api result: {}", result_path.display());
    Ok(result_path)
}
