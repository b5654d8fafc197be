//! Declarative skill-root setup for integration tests.

use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An isolated skill root with the directory layout the CLI expects.
///
/// # Example
/// ```no_run
/// use convolens_testing::TestWorld;
///
/// let world = TestWorld::new();
/// let mut cmd = assert_cmd::Command::cargo_bin("convolens").unwrap();
/// world.configure_command(&mut cmd);
/// cmd.arg("doctor").assert().success();
/// ```
pub struct TestWorld {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorld {
    /// Create a skill root with conversation/sidecar directories, the skill
    /// prompt files, and a config file.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        for dir in [
            "data/conversations",
            "data/insights/session",
            "data/insights/incremental",
            "output/skill_jobs",
            "skills",
            "scripts",
        ] {
            fs::create_dir_all(root.join(dir)).expect("Failed to create skill root dir");
        }

        fs::write(
            root.join("skills/diagnose-session.md"),
            "输出 SessionMechanismV1 JSON。",
        )
        .expect("Failed to write session skill");
        fs::write(
            root.join("skills/diagnose-incremental.md"),
            "输出 IncrementalMechanismV1 JSON。",
        )
        .expect("Failed to write incremental skill");
        fs::write(root.join("skills/coach.md"), "教练扩展约束。").expect("Failed to write coach skill");

        fs::write(
            root.join("config.yaml"),
            "notion:\n  token: test-token\ndatabases:\n  analysis_reports: db-test\n",
        )
        .expect("Failed to write config");

        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn write_conversation(&self, payload: &Value) {
        let session_id = payload["session_id"].as_str().expect("session_id");
        self.write_json(&format!("data/conversations/{}.json", session_id), payload);
    }

    pub fn write_session_sidecar(&self, payload: &Value) {
        let session_id = payload["session_id"].as_str().expect("session_id");
        self.write_json(&format!("data/insights/session/{}.json", session_id), payload);
    }

    pub fn write_json(&self, relative: &str, payload: &Value) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(path, serde_json::to_string_pretty(payload).expect("render json"))
            .expect("Failed to write json");
    }

    pub fn read_json(&self, relative: &str) -> Value {
        let content = fs::read_to_string(self.root.join(relative)).expect("read json file");
        serde_json::from_str(&content).expect("parse json file")
    }

    pub fn remove(&self, relative: &str) {
        let path = self.root.join(relative);
        if path.is_dir() {
            fs::remove_dir_all(path).expect("remove dir");
        } else if path.exists() {
            fs::remove_file(path).expect("remove file");
        }
    }

    /// Drop a stub stage executable into `scripts/` that logs its argv and
    /// exits with the given code.
    #[cfg(unix)]
    pub fn write_stub_script(&self, name: &str, exit_code: i32) {
        use std::os::unix::fs::PermissionsExt;

        let log_path = self.root.join(format!("{}.log", name));
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> {}\nexit {}\n",
            log_path.display(),
            exit_code
        );
        let path = self.root.join("scripts").join(name);
        fs::write(&path, script).expect("write stub script");
        let mut perms = fs::metadata(&path).expect("stat stub").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod stub");
    }

    /// Point a base command (from `cargo_bin_cmd!("convolens")` or
    /// `Command::cargo_bin`) at this world's root.
    pub fn configure_command<'a>(&self, cmd: &'a mut Command) -> &'a mut Command {
        cmd.arg("--root").arg(&self.root);
        cmd
    }
}
