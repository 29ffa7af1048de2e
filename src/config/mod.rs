//! Configuration loading and change notification.
//!
//! This module provides:
//! - `settings`: The settings model and the live `Configuration` handle
//! - `source`: Configuration sources (file-backed and in-memory)
//! - `watcher`: Debounced watcher for the settings file

pub mod settings;
pub mod source;
pub mod watcher;

pub use settings::{ConfigError, Configuration, HostSettings, Settings};
pub use source::{
    ConfigurationChange, ConfigurationSource, FileConfigurationSource, MemoryConfigurationSource,
};
pub use watcher::SettingsWatcher;
