//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.finch/config.json`) and environment.
//! The desktop app writes it back when settings change and on exit.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DashScope API key. Overridden by DASHSCOPE_API_KEY env when set.
    #[serde(default)]
    pub api_key: String,

    /// Model name as shown in the settings dialog (e.g. "qwen-plus"). Empty until the user picks one.
    #[serde(default)]
    pub selected_model: String,

    /// Dark mode for the window and for newly written transcripts.
    #[serde(default)]
    pub is_dark_mode: bool,

    /// Override the transcript directory. Relative paths are resolved against the config file's parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,

    /// Override the DashScope API base (default https://dashscope.aliyuncs.com/api/v1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Stream replies incrementally (default). When false, one blocking call returns the full answer.
    #[serde(default = "default_stream")]
    pub stream: bool,

    /// Extra model name → application id entries. Entries here win over the built-in table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub apps: BTreeMap<String, String>,
}

fn default_stream() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            selected_model: String::new(),
            is_dark_mode: false,
            history_dir: None,
            base_url: None,
            stream: default_stream(),
            apps: BTreeMap::new(),
        }
    }
}

/// Resolve the API key: env DASHSCOPE_API_KEY overrides config. Empty means "not configured".
pub fn resolve_api_key(config: &Config) -> String {
    std::env::var("DASHSCOPE_API_KEY")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.api_key.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FINCH_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".finch").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the transcript directory: `config.history_dir` if set, otherwise the `history`
/// subdirectory next to the config file.
pub fn resolve_history_dir(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_parent(config_path);
    match &config.history_dir {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                parent.join(d)
            }
        }
        _ => parent.join("history"),
    }
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Write config as pretty JSON, creating the parent directory if needed.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let parent = config_parent(path);
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating config directory {}", parent.display()))?;
    let s = serde_json::to_string_pretty(config).context("serializing config")?;
    std::fs::write(path, s).with_context(|| format!("writing config to {}", path.display()))?;
    log::debug!("saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.api_key.is_empty());
        assert!(config.selected_model.is_empty());
        assert!(!config.is_dark_mode);
        assert!(config.stream);
        assert!(config.apps.is_empty());
    }

    #[test]
    fn reads_plain_field_names() {
        let config: Config = serde_json::from_str(
            r#"{"api_key":"sk-1","selected_model":"qwen-max","is_dark_mode":true}"#,
        )
        .unwrap();
        assert_eq!(config.api_key, "sk-1");
        assert_eq!(config.selected_model, "qwen-max");
        assert!(config.is_dark_mode);
    }

    #[test]
    fn resolve_history_dir_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.finch/config.json");
        assert_eq!(
            resolve_history_dir(&config, path),
            PathBuf::from("/home/user/.finch/history")
        );
    }

    #[test]
    fn resolve_history_dir_override_relative() {
        let config = Config {
            history_dir: Some(PathBuf::from("chats")),
            ..Config::default()
        };
        let path = Path::new("/home/user/.finch/config.json");
        assert_eq!(
            resolve_history_dir(&config, path),
            PathBuf::from("/home/user/.finch/chats")
        );
    }

    #[test]
    fn resolve_history_dir_override_absolute() {
        let config = Config {
            history_dir: Some(PathBuf::from("/data/chats")),
            ..Config::default()
        };
        let path = Path::new("/home/user/.finch/config.json");
        assert_eq!(
            resolve_history_dir(&config, path),
            PathBuf::from("/data/chats")
        );
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("finch-config-test-{}", std::process::id()));
        let path = dir.join("nested").join("config.json");
        let config = Config {
            api_key: "sk-test".into(),
            selected_model: "qwen-plus".into(),
            is_dark_mode: true,
            ..Config::default()
        };
        save_config(&config, &path).unwrap();
        let (loaded, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(loaded.api_key, "sk-test");
        assert_eq!(loaded.selected_model, "qwen-plus");
        assert!(loaded.is_dark_mode);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("finch-config-test-missing/none.json");
        let (config, _) = load_config(Some(path)).unwrap();
        assert!(config.api_key.is_empty());
    }
}
