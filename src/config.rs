use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_FILE: &str = "config.toml";
const SESSIONS_FILE: &str = "sessions.json";
const REMOTE_TABLE_FILE: &str = "remote_table.json";
const TIMER_STATE_FILE: &str = "timer_state.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
    #[error("failed to encode config: {0}")]
    Encode(#[source] toml::ser::Error),
}

/// The durable backend session writes go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub backend: Backend,
    /// Legacy spreadsheet export, merged into the working collection at
    /// every load when set.
    pub import_file: Option<PathBuf>,
    pub local_sessions_file: Option<PathBuf>,
    pub remote_table_file: Option<PathBuf>,
}

impl TrackerConfig {
    pub fn local_sessions_path(&self) -> PathBuf {
        self.local_sessions_file
            .clone()
            .unwrap_or_else(|| state_dir().join(SESSIONS_FILE))
    }

    pub fn remote_table_path(&self) -> PathBuf {
        self.remote_table_file
            .clone()
            .unwrap_or_else(|| state_dir().join(REMOTE_TABLE_FILE))
    }
}

pub fn config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path.unwrap_or_else(|| state_dir().join(CONFIG_FILE))
}

/// The running-timer state file lives next to the config file, so
/// profiles selected via `--config` do not share a timer.
pub fn timer_state_path(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(TIMER_STATE_FILE),
        _ => state_dir().join(TIMER_STATE_FILE),
    }
}

/// A missing config file means defaults, not an error.
pub fn load_config(path: &Path) -> Result<TrackerConfig, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(TrackerConfig::default()),
        Err(err) => return Err(ConfigError::Io(err)),
    };

    toml::from_str(&raw).map_err(ConfigError::Parse)
}

pub fn save_config(path: &Path, config: &TrackerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let blob = toml::to_string_pretty(config).map_err(ConfigError::Encode)?;
    fs::write(path, blob)?;
    Ok(())
}

pub fn state_dir() -> PathBuf {
    if let Some(path) = env::var_os("STUDY_TRACKER_STATE_DIR") {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(path) = env::var_os("LOCALAPPDATA") {
            return PathBuf::from(path).join("study_tracker");
        }
    }

    if let Some(path) = env::var_os("XDG_STATE_HOME") {
        return PathBuf::from(path).join("study_tracker");
    }

    if let Some(path) = env::var_os("HOME") {
        return PathBuf::from(path)
            .join(".local")
            .join("state")
            .join("study_tracker");
    }

    PathBuf::from(".study_tracker")
}
