// SPDX-License-Identifier: GPL-3.0

//! Application settings persistence.
//!
//! Saves and loads the Gemini API key and model name as JSON in the XDG
//! config directory. Loading never fails; a missing or unreadable file
//! yields defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Model used when none has been configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-04-17";

/// Persisted application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Gemini API key; empty until the user sets one.
    #[serde(default)]
    pub api_key: String,
    /// Model name used for all generation requests.
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
        }
    }
}

/// Get the path to the settings file.
fn settings_file_path() -> Option<PathBuf> {
    // Use XDG_CONFIG_HOME or ~/.config
    let config_dir = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });

    Some(config_dir.join("ai-reader").join("settings.json"))
}

fn load_from(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }

    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "failed to open settings file");
            return Settings::default();
        }
    };

    match serde_json::from_reader(BufReader::new(file)) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "failed to parse settings file");
            Settings::default()
        }
    }
}

fn save_to(path: &Path, settings: &Settings) -> io::Result<()> {
    // Create directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // A cleared model name falls back to the default
    let mut settings = settings.clone();
    if settings.model.trim().is_empty() {
        settings.model = default_model();
    }

    let file = fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &settings)?;

    Ok(())
}

/// Load settings from disk.
pub fn load_settings() -> Settings {
    match settings_file_path() {
        Some(path) => load_from(&path),
        None => Settings::default(),
    }
}

/// Save settings to disk.
pub fn save_settings(settings: &Settings) -> io::Result<()> {
    let Some(path) = settings_file_path() else {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine settings path",
        ));
    };

    save_to(&path, settings)
}
