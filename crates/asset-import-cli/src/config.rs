use std::path::{Path, PathBuf};

use asset_import::ImportSettings;
use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub import: ImportSettings,
}

/// Config file path: `~/.config/asset-import/settings.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("asset-import").join("settings.toml"))
}

/// Load config from `path` (or the default location), falling back to
/// defaults if it is missing or unreadable.
pub fn load_config(path: Option<&Path>) -> AppConfig {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => config_path(),
    };

    if let Some(path) = path
        && let Ok(contents) = std::fs::read_to_string(&path)
    {
        match parse_config(&contents) {
            Ok(config) => return config,
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config, using defaults"
            ),
        }
    }

    AppConfig::default()
}

pub fn parse_config(contents: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str(contents)
}
