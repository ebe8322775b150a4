use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PostprocessError, Result};
use crate::spool_data::SpoolAssignments;

pub const SETTINGS_FILE_NAME: &str = "nvfsettings.json";
pub const SETTINGS_PATH_ENV: &str = "NVF_SETTINGS";
pub const OCTOPRINT_URL_ENV: &str = "NVF_OCTOPRINT_URL";
pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub octoprint_url: Option<String>,
    #[serde(default)]
    pub spool_data: SpoolAssignments,
    #[serde(rename = "settings version", default)]
    pub settings_version: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn normalized_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `NVF_SETTINGS` if set, else `nvfsettings.json` beside the executable.
pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var(SETTINGS_PATH_ENV)
        .ok()
        .and_then(|v| normalized_non_empty(&v))
    {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(SETTINGS_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE_NAME))
}

impl Settings {
    /// Missing file means empty settings; an unreadable or malformed one is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| {
            PostprocessError::Settings(format!(
                "Could not read settings file '{}': {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PostprocessError::Settings(format!(
                "Could not parse settings file '{}': {e}",
                path.display()
            ))
        })
    }

    pub fn save_to_path(&mut self, path: &Path) -> Result<()> {
        self.settings_version = Some(SETTINGS_VERSION);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|e| {
            PostprocessError::Settings(format!(
                "Could not write settings file '{}': {e}",
                path.display()
            ))
        })
    }

    /// `NVF_OCTOPRINT_URL` when set, else the stored URL.
    pub fn effective_octoprint_url(&self) -> Option<String> {
        std::env::var(OCTOPRINT_URL_ENV)
            .ok()
            .and_then(|v| normalized_non_empty(&v))
            .or_else(|| {
                self.octoprint_url
                    .as_deref()
                    .and_then(normalized_non_empty)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_defaults() {
        let td = tempdir().unwrap();
        let settings = Settings::load_from_path(&td.path().join(SETTINGS_FILE_NAME)).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn save_stamps_version_and_keeps_unknown_keys() {
        let td = tempdir().unwrap();
        let path = td.path().join(SETTINGS_FILE_NAME);
        fs::write(
            &path,
            r#"{"octoprint_url": "http://printer.local", "spool_data": {"1": {"sm_name": "Red"}}, "theme": "dark"}"#,
        )
        .unwrap();

        let mut settings = Settings::load_from_path(&path).unwrap();
        assert_eq!(settings.octoprint_url.as_deref(), Some("http://printer.local"));
        assert_eq!(settings.spool_data.get(1), Some("Red"));
        settings.spool_data.set(2, "Blue");
        settings.save_to_path(&path).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["settings version"], 1);
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["spool_data"]["2"]["sm_name"], "Blue");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let td = tempdir().unwrap();
        let path = td.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "{not json").unwrap();
        let err = Settings::load_from_path(&path).unwrap_err();
        assert!(matches!(err, PostprocessError::Settings(_)));
    }

    #[test]
    fn blank_url_counts_as_unset() {
        let settings = Settings {
            octoprint_url: Some("   ".to_string()),
            ..Settings::default()
        };
        if std::env::var(OCTOPRINT_URL_ENV).is_err() {
            assert_eq!(settings.effective_octoprint_url(), None);
        }
    }
}
