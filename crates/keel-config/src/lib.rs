//! Project configuration for the keel tracker.
//!
//! The `.keel/` directory is the root of a project's tracker state: the
//! database, the config file, installed workflow packs, and the generated
//! summary all live under it. This crate loads and saves `config.json` and
//! finds the `.keel/` directory by walking up the directory tree.

pub mod keel_dir;

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file contained invalid JSON.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// The `.keel/` directory was not found.
    #[error("no .keel directory found (run 'keel init' first)")]
    KeelDirNotFound,

    /// A configuration value was invalid.
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Current config file format version.
pub const CONFIG_VERSION: u32 = 1;

/// Contents of `.keel/config.json`.
///
/// The engine consumes this resolved struct; it never parses the file
/// itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Issue id prefix, e.g. `kl` in `kl-a1b2c3`.
    pub prefix: String,

    /// Config format version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workflow packs exposed to this project. Types from other installed
    /// packs are hidden.
    #[serde(default = "default_enabled_packs")]
    pub enabled_packs: Vec<String>,

    /// Legacy default-workflow override: the state list used for issue
    /// types that have no template.
    #[serde(default = "default_workflow_states")]
    pub workflow_states: Vec<String>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_enabled_packs() -> Vec<String> {
    vec!["core".to_owned(), "planning".to_owned()]
}

fn default_workflow_states() -> Vec<String> {
    vec![
        "open".to_owned(),
        "in_progress".to_owned(),
        "closed".to_owned(),
    ]
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            prefix: "kl".to_owned(),
            version: CONFIG_VERSION,
            enabled_packs: default_enabled_packs(),
            workflow_states: default_workflow_states(),
        }
    }
}

impl ProjectConfig {
    /// Creates a config with the given issue prefix and defaults elsewhere.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if the named pack is enabled for this project.
    pub fn pack_enabled(&self, name: &str) -> bool {
        self.enabled_packs.iter().any(|p| p == name)
    }

    /// Validates invariants that the file format cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "prefix".into(),
                reason: "must not be empty".into(),
            });
        }
        if !self
            .prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(ConfigError::InvalidValue {
                key: "prefix".into(),
                reason: "must be lowercase ascii letters or digits".into(),
            });
        }
        if self.workflow_states.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "workflow_states".into(),
                reason: "must list at least one state".into(),
            });
        }
        let unique: BTreeSet<&String> = self.workflow_states.iter().collect();
        if unique.len() != self.workflow_states.len() {
            return Err(ConfigError::InvalidValue {
                key: "workflow_states".into(),
                reason: "duplicate state names".into(),
            });
        }
        Ok(())
    }
}

/// Loads and validates the config from `{keel_dir}/config.json`.
pub fn load_config(keel_dir: &Path) -> Result<ProjectConfig> {
    let path = keel_dir.join("config.json");
    let data = std::fs::read_to_string(path)?;
    let config: ProjectConfig = serde_json::from_str(&data)?;
    config.validate()?;
    Ok(config)
}

/// Writes the config to `{keel_dir}/config.json`.
pub fn save_config(keel_dir: &Path, config: &ProjectConfig) -> Result<()> {
    config.validate()?;
    let path = keel_dir.join("config.json");
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(path, data + "\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let c = ProjectConfig::default();
        assert_eq!(c.prefix, "kl");
        assert!(c.pack_enabled("core"));
        assert!(c.pack_enabled("planning"));
        assert!(!c.pack_enabled("ops"));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig::with_prefix("proj");
        save_config(dir.path(), &config).unwrap();

        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn empty_prefix_rejected() {
        let mut c = ProjectConfig::default();
        c.prefix = String::new();
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn uppercase_prefix_rejected() {
        let mut c = ProjectConfig::default();
        c.prefix = "Proj".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn duplicate_states_rejected() {
        let mut c = ProjectConfig::default();
        c.workflow_states = vec!["open".into(), "open".into()];
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_tolerates_missing_optional_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"prefix": "abc"}"#,
        )
        .unwrap();
        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded.prefix, "abc");
        assert_eq!(loaded.version, CONFIG_VERSION);
        assert!(!loaded.enabled_packs.is_empty());
    }
}
