//! Configuration management for the cover worker.
//!
//! This module provides:
//! - TOML-based configuration with logical sections
//! - Atomic file writes (write to temp, then rename)
//! - Validation on load with automatic defaults
//!
//! # Example
//!
//! ```no_run
//! use cover_core::config::ConfigManager;
//!
//! let mut config = ConfigManager::new("worker.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Working root: {}", config.settings().paths.temp_root);
//! println!("ljb offsets: {:?}", config.settings().pitch_offsets_for("ljb"));
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    ConversionSettings, DeviceSettings, EffectsSettings, LoggingSettings, PathSettings,
    ProfileSettings, PublishSettings, ReverbPreset, SeparatorBackendKind, SeparatorSettings,
    Settings, StoreKind,
};
