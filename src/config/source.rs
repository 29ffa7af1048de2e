//! Configuration sources.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::settings::{ConfigError, Configuration, Settings};
use super::watcher::{SettingsWatcher, DEFAULT_SETTINGS_DEBOUNCE};
use crate::host::Subscription;

/// Capacity of the change notification channel.
const CHANGE_BUFFER: usize = 16;

/// How often the settings watcher is polled for raw events.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Notification that the configuration changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationChange {
    /// Settings in force after the change.
    pub settings: Settings,
}

/// Where configuration comes from.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    /// Load the configuration. Holders of the returned handle observe later reloads.
    async fn load(&self) -> Result<Configuration, ConfigError>;

    /// Stream of configuration changes.
    fn on_did_change(&self) -> broadcast::Receiver<ConfigurationChange>;

    /// Wire the change stream into the host's change detection.
    ///
    /// The returned subscription keeps change detection running until released.
    fn listen_for_changes(&self) -> Result<Subscription, ConfigError>;
}

struct FileSourceInner {
    path: PathBuf,
    configuration: Configuration,
    change_tx: broadcast::Sender<ConfigurationChange>,
}

impl FileSourceInner {
    async fn read(&self) -> Result<Settings, ConfigError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "settings file not found, using defaults");
                return Ok(Settings::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let settings: Settings =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    async fn reload(&self) -> Result<bool, ConfigError> {
        let settings = self.read().await?;
        if !self.configuration.replace(settings.clone()) {
            return Ok(false);
        }

        tracing::info!(path = %self.path.display(), "configuration changed");
        let _ = self.change_tx.send(ConfigurationChange { settings });
        Ok(true)
    }
}

/// Configuration backed by a JSON settings file.
#[derive(Clone)]
pub struct FileConfigurationSource {
    inner: Arc<FileSourceInner>,
    debounce: Duration,
}

impl FileConfigurationSource {
    /// Source reading the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            inner: Arc::new(FileSourceInner {
                path: path.into(),
                configuration: Configuration::default(),
                change_tx,
            }),
            debounce: DEFAULT_SETTINGS_DEBOUNCE,
        }
    }

    /// Quiet period before a file change triggers a reload.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// The settings file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Re-read the file, emitting a change if the settings differ.
    pub async fn reload(&self) -> Result<bool, ConfigError> {
        self.inner.reload().await
    }
}

#[async_trait]
impl ConfigurationSource for FileConfigurationSource {
    async fn load(&self) -> Result<Configuration, ConfigError> {
        let settings = self.inner.read().await?;
        self.inner.configuration.replace(settings);
        tracing::debug!(path = %self.inner.path.display(), "configuration loaded");
        Ok(self.inner.configuration.clone())
    }

    fn on_did_change(&self) -> broadcast::Receiver<ConfigurationChange> {
        self.inner.change_tx.subscribe()
    }

    fn listen_for_changes(&self) -> Result<Subscription, ConfigError> {
        let mut watcher = SettingsWatcher::new(&self.inner.path, self.debounce)?;
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            loop {
                watcher.poll_events();
                if watcher.flush_if_ready() {
                    if let Err(e) = inner.reload().await {
                        tracing::warn!("keeping previous settings, reload failed: {}", e);
                    }
                }
                tokio::time::sleep(WATCH_POLL_INTERVAL).await;
            }
        });

        Ok(Subscription::from_task("settings-watcher", handle))
    }
}

/// In-process configuration source.
pub struct MemoryConfigurationSource {
    configuration: Configuration,
    change_tx: broadcast::Sender<ConfigurationChange>,
    failure: Option<String>,
    loads: AtomicUsize,
    listening: Arc<AtomicBool>,
}

impl MemoryConfigurationSource {
    /// Source serving `settings`.
    pub fn new(settings: Settings) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            configuration: Configuration::new(settings),
            change_tx,
            failure: None,
            loads: AtomicUsize::new(0),
            listening: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A source whose `load` always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::new(Settings::default())
        }
    }

    /// Replace the settings and notify listeners.
    pub fn update(&self, settings: Settings) {
        self.configuration.replace(settings);
        self.notify_changed();
    }

    /// Notify listeners without changing anything.
    pub fn notify_changed(&self) {
        let _ = self.change_tx.send(ConfigurationChange {
            settings: self.configuration.snapshot(),
        });
    }

    /// Number of `load` calls so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Whether change detection is currently wired.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationSource for MemoryConfigurationSource {
    async fn load(&self) -> Result<Configuration, ConfigError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(reason) => Err(ConfigError::Invalid(reason.clone())),
            None => Ok(self.configuration.clone()),
        }
    }

    fn on_did_change(&self) -> broadcast::Receiver<ConfigurationChange> {
        self.change_tx.subscribe()
    }

    fn listen_for_changes(&self) -> Result<Subscription, ConfigError> {
        self.listening.store(true, Ordering::SeqCst);
        let listening = Arc::clone(&self.listening);
        Ok(Subscription::new("memory-config", move || {
            listening.store(false, Ordering::SeqCst);
        }))
    }
}
