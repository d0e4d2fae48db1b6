//! Bridge Configuration
//!
//! JSON preferences persisted under the app data directory, loaded with
//! serde defaults so a missing or partial file always yields a working
//! config. Hosts that keep their own settings storage implement [`Settings`]
//! instead of going through the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory name under the platform data dir
const APP_DIR: &str = "opencode-bridge";

const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("App data directory not found")]
    NoAppDataDir,
}

/// Settings collaborator read by the lifecycle at the moment a process
/// exit is handled. Hosts back this with their own settings storage.
pub trait Settings: Send + Sync {
    fn auto_restart_on_exit(&self) -> bool;
}

/// Bridge preferences persisted to config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Restart the server automatically when the monitor sees it die
    pub auto_restart_on_exit: bool,
    /// Retain only this many most-recently-updated sessions
    pub max_sessions: usize,
    /// Monitor polling interval
    pub health_check_interval_ms: u64,
    /// Total budget for the server to become healthy after spawn
    pub server_start_timeout_ms: u64,
    /// Explicit path to the opencode executable, overriding discovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            auto_restart_on_exit: true,
            max_sessions: 10,
            health_check_interval_ms: 1_000,
            server_start_timeout_ms: 10_000,
            binary_path: None,
        }
    }
}

impl Settings for BridgeConfig {
    fn auto_restart_on_exit(&self) -> bool {
        self.auto_restart_on_exit
    }
}

/// Get the app data directory (~/.local/share/opencode-bridge or platform
/// equivalent)
pub fn app_data_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir().ok_or(ConfigError::NoAppDataDir)?;
    Ok(base.join(APP_DIR))
}

/// Atomic write: write to a .tmp sibling then rename into place.
/// Prevents corruption if the process crashes mid-write.
pub(crate) fn atomic_write(path: &Path, contents: &str) -> Result<(), std::io::Error> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl BridgeConfig {
    /// Load config from the given directory, falling back to defaults when
    /// the file is absent. Unknown or missing fields deserialize to their
    /// defaults.
    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load from the standard app data directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&app_data_dir()?)
    }

    /// Persist to the given directory, creating it if needed.
    pub fn save_to(&self, dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(&dir.join(CONFIG_FILE), &content)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&app_data_dir()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert!(config.auto_restart_on_exit);
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.health_check_interval_ms, 1_000);
        assert_eq!(config.server_start_timeout_ms, 10_000);
        assert!(config.binary_path.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.max_sessions, BridgeConfig::default().max_sessions);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"autoRestartOnExit": false}"#,
        )
        .unwrap();
        let config = BridgeConfig::load_from(dir.path()).unwrap();
        assert!(!config.auto_restart_on_exit);
        assert_eq!(config.max_sessions, 10);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            max_sessions: 5,
            binary_path: Some("/opt/opencode/bin/opencode".to_string()),
            ..Default::default()
        };
        config.save_to(dir.path()).unwrap();
        let loaded = BridgeConfig::load_from(dir.path()).unwrap();
        assert_eq!(loaded.max_sessions, 5);
        assert_eq!(
            loaded.binary_path.as_deref(),
            Some("/opt/opencode/bin/opencode")
        );
    }
}
