//! Settings model and the shared configuration handle.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or watching configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Io {
        /// Settings file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`Settings`].
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        /// Settings file path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// The settings parsed but failed validation.
    #[error("invalid settings: {0}")]
    Invalid(String),

    /// The settings file could not be watched.
    #[error("failed to watch settings: {0}")]
    Watch(#[from] notify::Error),
}

/// Credentials and identity configured for one pull-request host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostSettings {
    /// Host name, matched case-insensitively.
    pub host: String,
    /// Account name on the host.
    pub username: Option<String>,
    /// Access token; hosts without one have no credentials.
    pub token: Option<String>,
}

/// User settings for the review integration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Configured pull-request hosts.
    pub hosts: Vec<HostSettings>,
}

impl Settings {
    /// Reject host entries without a host name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(index) = self.hosts.iter().position(|h| h.host.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "hosts[{index}] has an empty host name"
            )));
        }
        Ok(())
    }

    /// Settings for `name`, ignoring case.
    pub fn host(&self, name: &str) -> Option<&HostSettings> {
        self.hosts.iter().find(|h| h.host.eq_ignore_ascii_case(name))
    }
}

/// Live, shared view of the current settings.
///
/// Clones share the same settings, so a reload is visible to every holder.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    inner: Arc<RwLock<Settings>>,
}

impl Configuration {
    /// Handle holding `settings`.
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    /// Current settings for `name`, ignoring case.
    pub fn host(&self, name: &str) -> Option<HostSettings> {
        self.inner.read().host(name).cloned()
    }

    /// Replace the settings, returning whether anything changed.
    pub(crate) fn replace(&self, settings: Settings) -> bool {
        let mut current = self.inner.write();
        if *current == settings {
            return false;
        }
        *current = settings;
        true
    }
}
