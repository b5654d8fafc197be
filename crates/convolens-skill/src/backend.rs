//! Provider dispatch: one `SkillBackend` seam over four inference backends.

use crate::error::Error;
use crate::extract::{extract_cli_json_response, extract_json_payload};
use crate::prompt::{build_skill_user_prompt, runtime_system_prompt};
use crate::provider::Provider;
use serde_json::{json, Value};
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

const MAX_RETRIES: usize = 2;
const RETRYABLE_MARKERS: [&str; 4] = ["timed out", "failed rc=1", "no json object found", "rate limit"];
const CODEX_CLI_REASONING_EFFORT: &str = "medium";

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One inference failure. Retryability is decided from the message text so
/// provider-specific failures (timeouts, rc=1, rate limits, JSON-extract
/// misses) share one classification.
#[derive(Debug, Clone)]
pub struct InferError {
    message: String,
}

impl InferError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        let text = self.message.to_lowercase();
        RETRYABLE_MARKERS.iter().any(|marker| text.contains(marker))
    }
}

impl fmt::Display for InferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for InferError {}

/// Which Skill pass is being executed; decides prompt labels and HTTP token
/// budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferKind {
    Session,
    Incremental,
}

impl InferKind {
    pub fn input_name(&self) -> &'static str {
        match self {
            InferKind::Session => "SessionDigestV1",
            InferKind::Incremental => "IncrementalInputV1",
        }
    }

    pub fn output_schema(&self) -> &'static str {
        match self {
            InferKind::Session => "SessionMechanismV1",
            InferKind::Incremental => "IncrementalMechanismV1",
        }
    }

    fn max_tokens(&self) -> u32 {
        match self {
            InferKind::Session => 2000,
            InferKind::Incremental => 3000,
        }
    }
}

/// The single seam the batch/chunk orchestration depends on; tests provide
/// in-memory implementations.
pub trait SkillBackend: Sync {
    fn infer(&self, kind: InferKind, skill_prompt: &str, input: &Value) -> Result<Value, InferError>;
}

/// Retry transient failures with exponential backoff capped at 4 seconds.
pub fn infer_with_retries<F>(mut call: F, max_retries: usize) -> Result<Value, InferError>
where
    F: FnMut() -> Result<Value, InferError>,
{
    let mut attempt = 0;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_retries || !err.is_retryable() {
                    return Err(err);
                }
                std::thread::sleep(Duration::from_secs((1u64 << attempt).min(4)));
                attempt += 1;
            }
        }
    }
}

/// Real provider-backed implementation.
#[derive(Debug)]
pub struct ProviderBackend {
    provider: Provider,
    model: String,
    timeout: Duration,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl ProviderBackend {
    /// Build a backend, failing fast when a required API key is absent.
    pub fn new(provider: Provider, model: String, timeout_sec: u64) -> Result<Self, Error> {
        let api_key = match provider.api_key_env() {
            Some(env) => {
                let key = std::env::var(env).unwrap_or_default().trim().to_string();
                if key.is_empty() {
                    return Err(Error::Invocation(format!("{} is not set", env)));
                }
                Some(key)
            }
            None => None,
        };

        let timeout = Duration::from_secs(timeout_sec.max(10));
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Invocation(format!("failed to build HTTP client: {}", err)))?;

        Ok(Self {
            provider,
            model,
            timeout,
            api_key,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn infer_once(&self, kind: InferKind, skill_prompt: &str, input: &Value) -> Result<Value, InferError> {
        let user_prompt =
            build_skill_user_prompt(skill_prompt, kind.input_name(), input, kind.output_schema());
        match self.provider {
            Provider::ClaudeCli => self.claude_cli_infer(&user_prompt),
            Provider::CodexCli => self.codex_cli_infer(&user_prompt),
            Provider::OpenAi => self.openai_infer(&user_prompt),
            Provider::Anthropic => self.anthropic_infer(kind, &user_prompt),
        }
    }

    fn claude_cli_infer(&self, user_prompt: &str) -> Result<Value, InferError> {
        let mut cmd = Command::new("claude");
        cmd.args([
            "-p",
            "--output-format",
            "json",
            "--no-session-persistence",
            "--model",
            self.model.as_str(),
            "--system-prompt",
            runtime_system_prompt(),
        ])
        .arg(user_prompt);

        let output = run_with_timeout(cmd, self.timeout, "claude_cli")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InferError::new(format!(
                "claude_cli failed rc={}: {}",
                output.status.code().unwrap_or(-1),
                head(stderr.trim(), 500)
            )));
        }
        extract_cli_json_response(&String::from_utf8_lossy(&output.stdout))
    }

    fn codex_cli_infer(&self, user_prompt: &str) -> Result<Value, InferError> {
        let workdir = codex_cli_workdir()
            .map_err(|err| InferError::new(format!("codex_cli workdir setup failed: {}", err)))?;
        let out_file = tempfile::Builder::new()
            .prefix("codex-last-msg-")
            .suffix(".txt")
            .tempfile()
            .map_err(|err| InferError::new(format!("codex_cli temp file failed: {}", err)))?;
        let out_path = out_file.path().to_path_buf();

        let mut cmd = Command::new("codex");
        cmd.arg("exec")
            .arg("--skip-git-repo-check")
            .arg("-C")
            .arg(&workdir)
            .args(["--sandbox", "workspace-write", "--model", self.model.as_str(), "-c"])
            .arg(format!("model_reasoning_effort=\"{}\"", CODEX_CLI_REASONING_EFFORT))
            .arg("--output-last-message")
            .arg(&out_path)
            .arg(user_prompt);

        let output = run_with_timeout(cmd, self.timeout, "codex_cli")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let hint = if stderr.is_empty() { stdout } else { stderr };
            return Err(InferError::new(format!(
                "codex_cli failed rc={}: {}",
                output.status.code().unwrap_or(-1),
                head(&hint, 500)
            )));
        }

        let text = std::fs::read_to_string(&out_path).unwrap_or_default();
        if text.trim().is_empty() {
            return Err(InferError::new(
                "codex_cli finished without output-last-message file",
            ));
        }
        extract_json_payload(&text)
    }

    fn openai_infer(&self, user_prompt: &str) -> Result<Value, InferError> {
        let api_key = self.api_key.as_deref().unwrap_or_default();
        let payload = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": runtime_system_prompt()},
                {"role": "user", "content": user_prompt},
            ],
        });
        let response = self.post_json(
            OPENAI_URL,
            &[("Authorization", format!("Bearer {}", api_key))],
            &payload,
        )?;

        let choices = response.get("choices").and_then(Value::as_array);
        let Some(message) = choices.and_then(|c| c.first()).and_then(|c| c.get("message")) else {
            return Err(InferError::new("OpenAI response missing choices"));
        };
        let text = match message.get("content") {
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>(),
            Some(Value::String(content)) => content.clone(),
            _ => String::new(),
        };
        extract_json_payload(&text)
    }

    fn anthropic_infer(&self, kind: InferKind, user_prompt: &str) -> Result<Value, InferError> {
        let api_key = self.api_key.clone().unwrap_or_default();
        let payload = json!({
            "model": self.model,
            "max_tokens": kind.max_tokens(),
            "temperature": 0.2,
            "system": runtime_system_prompt(),
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": user_prompt}]},
            ],
        });
        let response = self.post_json(
            ANTHROPIC_URL,
            &[("x-api-key", api_key), ("anthropic-version", ANTHROPIC_VERSION.to_string())],
            &payload,
        )?;

        let text: String = response
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(Value::as_object)
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        extract_json_payload(&text)
    }

    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        payload: &Value,
    ) -> Result<Value, InferError> {
        let mut request = self.client.post(url).json(payload);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request.send().map_err(network_error)?;
        let status = response.status();
        let body = response.text().map_err(network_error)?;
        if !status.is_success() {
            return Err(InferError::new(format!(
                "HTTP {}: {}",
                status.as_u16(),
                head(&body, 500)
            )));
        }
        serde_json::from_str(&body)
            .map_err(|err| InferError::new(format!("invalid JSON response: {}", err)))
    }
}

impl SkillBackend for ProviderBackend {
    fn infer(&self, kind: InferKind, skill_prompt: &str, input: &Value) -> Result<Value, InferError> {
        infer_with_retries(|| self.infer_once(kind, skill_prompt, input), MAX_RETRIES)
    }
}

fn network_error(err: reqwest::Error) -> InferError {
    if err.is_timeout() {
        InferError::new(format!("request timed out: {}", err))
    } else {
        InferError::new(format!("Network error: {}", err))
    }
}

fn head(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Stable isolated workdir so the codex CLI does not pick up ambient
/// repository-level agent configuration.
fn codex_cli_workdir() -> std::io::Result<PathBuf> {
    let path = std::env::temp_dir().join("convolens-codex-runtime");
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Run a subprocess with a hard timeout, killing it once the deadline
/// passes. Pipes are drained on reader threads so large outputs cannot
/// deadlock the child.
fn run_with_timeout(mut cmd: Command, timeout: Duration, label: &str) -> Result<Output, InferError> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .map_err(|err| InferError::new(format!("{} spawn failed: {}", label, err)))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| InferError::new(format!("{} stdout unavailable", label)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| InferError::new(format!("{} stderr unavailable", label)))?;

    let stdout_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(InferError::new(format!(
                        "{} timed out after {}s",
                        label,
                        timeout.as_secs()
                    )));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                return Err(InferError::new(format!("{} wait failed: {}", label, err)));
            }
        }
    };

    Ok(Output {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}
