//! Initialize the configuration directory: create ~/.finch, a default config, and the history directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with default values if missing.
/// - Creates the transcript directory resolved from the config.
///
/// Returns the transcript directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        config::save_config(&config::Config::default(), config_path)?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let history_dir = config::resolve_history_dir(&config, config_path);
    if !history_dir.exists() {
        std::fs::create_dir_all(&history_dir)
            .with_context(|| format!("creating history directory {}", history_dir.display()))?;
        log::info!("created history directory at {}", history_dir.display());
    } else {
        log::debug!("history directory already exists at {}, skipping", history_dir.display());
    }

    Ok(history_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_config_and_history() {
        let dir = std::env::temp_dir().join(format!("finch-init-test-{}", std::process::id()));
        let config_path = dir.join("config.json");
        let history = init_config_dir(&config_path).unwrap();
        assert!(config_path.exists());
        assert_eq!(history, dir.join("history"));
        assert!(history.is_dir());

        // Second run leaves an edited config alone.
        std::fs::write(&config_path, r#"{"api_key":"kept"}"#).unwrap();
        init_config_dir(&config_path).unwrap();
        let (config, _) = config::load_config(Some(config_path)).unwrap();
        assert_eq!(config.api_key, "kept");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
