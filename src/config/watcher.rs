//! Debounced watcher for the settings file.
//!
//! Editors rarely write a settings file in one step: a save can show up as a
//! truncate, several writes and a rename. This watcher collects raw events
//! for the settings file and reports a single change once the file has been
//! quiet for the debounce period.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

use super::settings::ConfigError;

/// Default quiet period before a settings change is reported.
pub const DEFAULT_SETTINGS_DEBOUNCE: Duration = Duration::from_millis(200);

/// Watches the directory holding the settings file and debounces its events.
pub struct SettingsWatcher {
    // Never read; dropping it ends the watch.
    _watcher: RecommendedWatcher,
    event_rx: Receiver<Result<Event, notify::Error>>,
    target: PathBuf,
    debounce_duration: Duration,
    last_event: Option<Instant>,
}

impl SettingsWatcher {
    /// Start watching `target`.
    ///
    /// The parent directory is watched (non-recursively) so that files
    /// replaced by rename are still seen.
    pub fn new(target: &Path, debounce: Duration) -> Result<Self, ConfigError> {
        let (tx, rx) = channel();

        let config = Config::default().with_compare_contents(false);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let _ = tx.send(res);
            },
            config,
        )?;

        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %target.display(), "watching settings file");

        Ok(Self {
            _watcher: watcher,
            event_rx: rx,
            target: target.to_path_buf(),
            debounce_duration: debounce,
            last_event: None,
        })
    }

    /// Drain raw events, noting whether any touched the settings file.
    pub fn poll_events(&mut self) {
        while let Ok(result) = self.event_rx.try_recv() {
            match result {
                Ok(event) => {
                    if is_settings_event(&event.kind, &event.paths, &self.target) {
                        self.last_event = Some(Instant::now());
                    }
                }
                Err(e) => {
                    tracing::warn!("settings watcher error: {}", e);
                }
            }
        }
    }

    /// Returns `true` once, when the settings file has been quiet long enough.
    pub fn flush_if_ready(&mut self) -> bool {
        match self.last_event {
            Some(at) if at.elapsed() >= self.debounce_duration => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a change is waiting out its debounce period.
    pub fn is_pending(&self) -> bool {
        self.last_event.is_some()
    }
}

/// Whether a raw event concerns the settings file.
fn is_settings_event(kind: &EventKind, paths: &[PathBuf], target: &Path) -> bool {
    let relevant_kind = matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && paths
            .iter()
            .any(|path| path.file_name().is_some() && path.file_name() == target.file_name())
}
