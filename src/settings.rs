//! File-backed settings store (`settings.json`)

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{
    APPLICATION, DEFAULT_CHANNELS, DEFAULT_DURATION_SECS, DEFAULT_FILENAME,
    DEFAULT_FRAMES_PER_BUFFER, DEFAULT_SAMPLE_RATE, MAX_CHANNELS, ORGANIZATION, QUALIFIER,
    RECORDS_DIR, SETTINGS_FILE,
};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not determine a home directory")]
    NoHomeDir,
    #[error("Settings I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("The setting was not found by this address \"{0}\"")]
    NotFound(String),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Capture parameters and naming used by the record producer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RecorderSettings {
    /// Sample rate in Hz
    pub freq: u32,
    pub channels: u16,
    pub frames_per_buffer: u32,
    /// Length of a quick (fixed-duration) recording, in seconds
    pub duration: u32,
    /// Filename stem; recordings are saved as `<stem>_<n>.wav`
    pub default_filename: String,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            freq: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            duration: DEFAULT_DURATION_SECS,
            default_filename: DEFAULT_FILENAME.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct GuiSettings {
    pub always_on_top: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub recorder: RecorderSettings,
    /// Empty means the per-user data directory
    pub save_records_path: String,
    pub gui: GuiSettings,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

impl AppSettings {
    /// Location of `settings.json` in the per-user config directory.
    pub fn settings_path() -> Result<PathBuf, SettingsError> {
        let proj_dirs = project_dirs().ok_or(SettingsError::NoHomeDir)?;
        Ok(proj_dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Loads the user's settings, falling back to defaults when the file is
    /// missing, unreadable or invalid.
    pub fn load() -> Self {
        let path = match Self::settings_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("{}, using default settings", e);
                return Self::default();
            }
        };

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring settings file: {}", e);
                Self::default()
            }
        }
    }

    /// Reads and validates settings from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let settings: AppSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        tracing::info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let recorder = &self.recorder;
        if recorder.freq == 0 {
            return Err(SettingsError::Invalid("recorder.freq must be positive".into()));
        }
        if recorder.channels == 0 || recorder.channels > MAX_CHANNELS {
            return Err(SettingsError::Invalid(format!(
                "recorder.channels must be between 1 and {}",
                MAX_CHANNELS
            )));
        }
        if recorder.frames_per_buffer == 0 {
            return Err(SettingsError::Invalid(
                "recorder.frames_per_buffer must be positive".into(),
            ));
        }
        if recorder.duration == 0 {
            return Err(SettingsError::Invalid("recorder.duration must be positive".into()));
        }
        let stem = recorder.default_filename.trim();
        if stem.is_empty() || stem.contains(['/', '\\']) || stem == "." || stem == ".." {
            return Err(SettingsError::Invalid(format!(
                "recorder.default_filename {:?} is not a valid file name",
                recorder.default_filename
            )));
        }
        Ok(())
    }

    /// Directory recordings are saved to and listed from, created if missing.
    pub fn records_dir(&self) -> Result<PathBuf, SettingsError> {
        let configured = self.save_records_path.trim();
        let dir = if configured.is_empty() {
            let proj_dirs = project_dirs().ok_or(SettingsError::NoHomeDir)?;
            proj_dirs.data_dir().join(RECORDS_DIR)
        } else {
            PathBuf::from(configured)
        };

        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Looks up a value by dotted address, e.g. `recorder.freq`.
    pub fn get_setting(&self, address: &str) -> Result<Value, SettingsError> {
        let root = serde_json::to_value(self)?;
        let mut current = &root;
        for key in address.split('.') {
            current = current
                .as_object()
                .and_then(|object| object.get(key))
                .ok_or_else(|| SettingsError::NotFound(address.to_string()))?;
        }
        Ok(current.clone())
    }
}
