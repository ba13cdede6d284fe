//! Configuration module for TierSearch
//!
//! Settings are loaded once from YAML and environment variables, validated,
//! and handed to each component's constructor as an explicit value.

mod settings;

pub use settings::*;

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

/// Locate and load settings
///
/// An explicit path wins, then `TIERSEARCH_SETTINGS_PATH`, then the default
/// locations. Falls back to defaults when no file exists.
pub fn load(explicit: Option<&Path>) -> Result<Settings> {
    let mut settings = match find_settings_file(explicit) {
        Some(path) => {
            info!("Loading settings from: {}", path.display());
            Settings::from_file(&path)?
        }
        None => {
            info!("No settings file found, using defaults");
            Settings::default()
        }
    };
    settings.merge_env();
    settings.validate()?;
    Ok(settings)
}

fn find_settings_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var("TIERSEARCH_SETTINGS_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let mut candidates = vec![
        PathBuf::from("tiersearch.yml"),
        PathBuf::from("config/tiersearch.yml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("tiersearch/settings.yml"));
    }

    candidates.into_iter().find(|p| p.exists())
}
