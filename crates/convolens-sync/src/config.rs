use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Credentials and external-database ids loaded from `config.yaml`.
///
/// ```yaml
/// notion:
///   token: secret_xxx
/// databases:
///   analysis_reports: 1234abcd...
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub notion: NotionAuth,
    #[serde(default)]
    pub databases: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotionAuth {
    #[serde(default)]
    pub token: String,
}

impl SyncConfig {
    pub fn database(&self, name: &str) -> Option<&str> {
        self.databases
            .get(name)
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<SyncConfig> {
    if !path.is_file() {
        return Err(Error::Config(format!("config file not found: {}", path.display())));
    }
    let content = fs::read_to_string(path)?;
    serde_yaml::from_str(&content)
        .map_err(|err| Error::Config(format!("failed to load config: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_token_and_databases() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(
            &path,
            "notion:\n  token: secret_x\ndatabases:\n  analysis_reports: db-1\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.notion.token, "secret_x");
        assert_eq!(config.database("analysis_reports"), Some("db-1"));
        assert_eq!(config.database("missing"), None);
    }

    #[test]
    fn missing_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = load_config(&temp.path().join("config.yaml")).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
