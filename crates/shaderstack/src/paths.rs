use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::ProjectDirs;
use stackconfig::Settings;

pub const ENV_CONFIG_DIR: &str = "SHADERSTACK_CONFIG_DIR";
pub const SETTINGS_FILE: &str = "settings.toml";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Shaderstack";
const APPLICATION: &str = "Shaderstack";

/// Directory holding `settings.toml`.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(value) = env_override(ENV_CONFIG_DIR) {
        return Ok(value);
    }
    let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
        .ok_or_else(|| anyhow!("failed to determine user directories"))?;
    Ok(project_dirs.config_dir().to_path_buf())
}

/// Loads settings from `explicit` when given (it must exist), otherwise
/// from the config directory, falling back to defaults.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    if let Some(path) = explicit {
        tracing::debug!(path = %path.display(), "loading settings");
        return Settings::load(path).with_context(|| format!("failed to load settings from {}", path.display()));
    }
    let path = config_dir()
        .context("failed to resolve shaderstack config directory")?
        .join(SETTINGS_FILE);
    tracing::debug!(path = %path.display(), exists = path.exists(), "loading settings");
    Settings::load_or_default(&path).with_context(|| format!("failed to load settings from {}", path.display()))
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.as_os_str().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
