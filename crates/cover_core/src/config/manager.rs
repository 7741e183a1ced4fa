//! Config manager for loading and saving settings.
//!
//! Key features:
//! - Atomic writes (write to temp file, then rename)
//! - Missing keys are filled with defaults and written back
//! - Directory bootstrap for temp, log and store roots

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::settings::{Settings, StoreKind};

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Manages worker configuration.
pub struct ConfigManager {
    /// Path to the config file.
    config_path: PathBuf,
    /// Current settings loaded in memory.
    settings: Settings,
}

impl ConfigManager {
    /// Create a new config manager with the given config file path.
    ///
    /// Does not load the config - call `load()` or `load_or_create()` after.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            settings: Settings::default(),
        }
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get a reference to the current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get a mutable reference to the current settings.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Consume the manager, returning the loaded settings.
    pub fn into_settings(self) -> Settings {
        self.settings
    }

    /// Load config from file.
    ///
    /// Returns error if file doesn't exist.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path)?;
        self.settings = parse_and_validate(&content)?;
        Ok(())
    }

    /// Load config from file, creating with defaults if it doesn't exist.
    ///
    /// Files missing keys are rewritten with the defaults filled in.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            let settings = parse_and_validate(&content)?;
            let reserialized = toml::to_string_pretty(&settings)?;
            self.settings = settings;

            if strip_header(&content).trim() != reserialized.trim() {
                tracing::debug!(
                    "Config {} was missing keys, writing defaults back",
                    self.config_path.display()
                );
                self.save()?;
            }
        } else {
            self.settings = Settings::default();
            self.save()?;
        }
        Ok(())
    }

    /// Ensure all configured directories exist.
    ///
    /// Creates the temp, logs and (for the local store) bucket directories.
    pub fn ensure_dirs_exist(&self) -> ConfigResult<()> {
        let mut dirs = vec![
            PathBuf::from(&self.settings.paths.temp_root),
            PathBuf::from(&self.settings.paths.logs_folder),
        ];
        if self.settings.publish.store == StoreKind::Local {
            dirs.push(PathBuf::from(&self.settings.publish.store_root));
        }

        for dir in dirs {
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
            }
        }

        Ok(())
    }

    /// Get the logs folder path.
    pub fn logs_folder(&self) -> PathBuf {
        PathBuf::from(&self.settings.paths.logs_folder)
    }

    /// Save the entire config atomically.
    pub fn save(&self) -> ConfigResult<()> {
        let mut content = String::from(CONFIG_HEADER);
        content.push_str(&toml::to_string_pretty(&self.settings)?);
        self.atomic_write(&content)?;
        Ok(())
    }

    /// Write content to config file atomically.
    ///
    /// Writes to a temp file first, then renames.
    fn atomic_write(&self, content: &str) -> io::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.config_path.with_extension("toml.tmp");

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

const CONFIG_HEADER: &str = "# Cover worker configuration\n\
# Missing keys are filled with defaults on load.\n\n";

fn strip_header(content: &str) -> &str {
    content.strip_prefix(CONFIG_HEADER).unwrap_or(content)
}

/// Parse settings and reject values the engine cannot run with.
fn parse_and_validate(content: &str) -> ConfigResult<Settings> {
    let settings: Settings = toml::from_str(content)?;

    if settings.device.permits == 0 {
        return Err(ConfigError::Invalid(
            "device.permits must be at least 1".to_string(),
        ));
    }
    if settings.separator.output_format.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "separator.output_format must not be empty".to_string(),
        ));
    }
    if settings.publish.store == StoreKind::Http && settings.publish.store_url.is_none() {
        return Err(ConfigError::Invalid(
            "publish.store_url is required for the http store".to_string(),
        ));
    }
    if let Some((model, _)) = settings
        .voice_models
        .iter()
        .find(|(_, offsets)| offsets.is_empty())
    {
        return Err(ConfigError::Invalid(format!(
            "voice_models.{} has no pitch offsets",
            model
        )));
    }

    Ok(settings)
}
