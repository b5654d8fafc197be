use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout under a skill root.
///
/// ```text
/// <root>/data/conversations/<session_id>.json
/// <root>/data/insights/session/<session_id>.json
/// <root>/data/insights/incremental/<period_id>.json
/// <root>/output/skill_jobs/<run_id>/...
/// <root>/skills/*.md
/// <root>/scripts/<external stage executables>
/// <root>/config.yaml
/// ```
#[derive(Debug, Clone)]
pub struct SkillRoot {
    root: PathBuf,
}

impl SkillRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.root.join("data").join("conversations")
    }

    pub fn session_insights_dir(&self) -> PathBuf {
        self.root.join("data").join("insights").join("session")
    }

    pub fn incremental_insights_dir(&self) -> PathBuf {
        self.root.join("data").join("insights").join("incremental")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("output").join("skill_jobs")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("skills")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn session_sidecar_path(&self, session_id: &str) -> PathBuf {
        self.session_insights_dir().join(format!("{}.json", session_id))
    }

    pub fn incremental_sidecar_path(&self, period_id: &str) -> PathBuf {
        self.incremental_insights_dir().join(format!("{}.json", period_id))
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.jobs_dir().join(run_id)
    }

    /// Create the writable directories required by a diagnose run.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.session_insights_dir(),
            self.incremental_insights_dir(),
            self.jobs_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
