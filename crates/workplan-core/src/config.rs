use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;

pub const DEFAULT_CATEGORY_COLOR: &str = "#4CAF50";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkplanConfig {
    /// Directory holding `data/`. Relative paths resolve against the config file's directory.
    pub data_root: Option<String>,
    /// Color given to categories created without one.
    pub default_category_color: Option<String>,
    /// How long a writer waits for another process holding the data lock.
    pub lock_timeout_ms: Option<u64>,
}

/// Effective settings after applying config precedence and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub default_category_color: String,
    pub lock_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_category_color: DEFAULT_CATEGORY_COLOR.to_string(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

pub fn config_filename_candidates() -> [&'static str; 2] {
    [".workplan.toml", ".workplanrc"]
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(".workplan.toml")
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn resolve_workplan_home_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("WORKPLAN_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".workplan"))
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_workplan_home_dir().map(|home| home.join("config.toml"))
}

pub fn find_config_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    for candidate in start.ancestors() {
        for name in config_filename_candidates() {
            if candidate.join(name).is_file() {
                return Some(candidate.to_path_buf());
            }
        }
    }
    None
}

pub fn load_config(dir: &Path) -> Option<WorkplanConfig> {
    for name in config_filename_candidates() {
        let path = dir.join(name);
        if path.is_file() {
            if let Ok(text) = fs::read_to_string(&path) {
                match toml::from_str::<WorkplanConfig>(&text) {
                    Ok(config) => return Some(config),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable config");
                    }
                }
            }
        }
    }
    None
}

pub fn load_global_config() -> Option<WorkplanConfig> {
    let path = global_config_path()?;
    if !path.is_file() {
        return None;
    }
    let text = fs::read_to_string(path).ok()?;
    toml::from_str::<WorkplanConfig>(&text).ok()
}

pub fn write_config(dir: &Path, config: &WorkplanConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path(dir);
    let body = toml::to_string_pretty(config)?;
    fs::write(&path, body)?;
    Ok(path)
}

/// Picks the data root: explicit path, then project config, then global config,
/// then `start` itself.
pub fn resolve_data_root_with_source(
    start: &Path,
    explicit: Option<&Path>,
) -> (PathBuf, &'static str) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), "explicit");
    }
    if let Some(config_root) = find_config_root(start) {
        if let Some(root) = load_config(&config_root).and_then(|config| config.data_root) {
            let root = root.trim();
            if !root.is_empty() {
                return (config_root.join(root), "project");
            }
        }
    }
    if let Some(root) = load_global_config().and_then(|config| config.data_root) {
        let root = root.trim();
        if !root.is_empty() {
            return (PathBuf::from(root), "global");
        }
    }
    (start.to_path_buf(), "default")
}

pub fn resolve_data_root(start: &Path, explicit: Option<&Path>) -> PathBuf {
    resolve_data_root_with_source(start, explicit).0
}

/// Project config values win over global ones, field by field.
pub fn resolve_settings(start: &Path) -> Settings {
    let project = find_config_root(start).and_then(|root| load_config(&root));
    let global = load_global_config();
    let defaults = Settings::default();

    let default_category_color = project
        .as_ref()
        .and_then(|config| config.default_category_color.clone())
        .or_else(|| {
            global
                .as_ref()
                .and_then(|config| config.default_category_color.clone())
        })
        .map(|color| color.trim().to_string())
        .filter(|color| !color.is_empty())
        .unwrap_or(defaults.default_category_color);
    let lock_timeout_ms = project
        .as_ref()
        .and_then(|config| config.lock_timeout_ms)
        .or_else(|| global.as_ref().and_then(|config| config.lock_timeout_ms))
        .unwrap_or(defaults.lock_timeout_ms);

    Settings {
        default_category_color,
        lock_timeout_ms,
    }
}
