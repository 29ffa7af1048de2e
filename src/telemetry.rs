//! Telemetry sink.
//!
//! Events are buffered in memory and written out as JSON lines when the
//! session shuts down.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors raised while flushing telemetry.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Writing the telemetry file failed.
    #[error("failed to write telemetry to {path}: {source}")]
    Io {
        /// Telemetry file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An event could not be encoded.
    #[error("failed to serialize telemetry event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A named telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Event name.
    pub name: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Accepts named events; shut down once at teardown.
#[async_trait]
pub trait Telemetry: Send + Sync {
    /// Record an event.
    fn on(&self, event: &str);

    /// Flush and close the session.
    async fn shutdown(&self) -> Result<(), TelemetryError>;
}

/// Telemetry session writing JSON lines, or kept in memory only.
pub struct JsonlTelemetry {
    path: Option<PathBuf>,
    pending: Mutex<Vec<TelemetryEvent>>,
    recorded: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl JsonlTelemetry {
    /// Session that appends to `path` on shutdown.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_path(Some(path.into()))
    }

    /// Session that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::with_path(None)
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            path,
            pending: Mutex::new(Vec::new()),
            recorded: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// File written on shutdown; `None` for in-memory sessions.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Names of every event accepted by this session, in order.
    pub fn events(&self) -> Vec<String> {
        self.recorded.lock().clone()
    }

    /// Number of accepted events with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.recorded.lock().iter().filter(|e| *e == name).count()
    }

    /// Whether the session has shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Telemetry for JsonlTelemetry {
    fn on(&self, event: &str) {
        if self.is_closed() {
            tracing::debug!(event, "telemetry closed, dropping event");
            return;
        }

        tracing::info!(target: "telemetry", event, "telemetry event");
        self.recorded.lock().push(event.to_string());
        self.pending.lock().push(TelemetryEvent {
            name: event.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn shutdown(&self) -> Result<(), TelemetryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let events = std::mem::take(&mut *self.pending.lock());
        let Some(path) = &self.path else {
            tracing::debug!(count = events.len(), "telemetry session closed");
            return Ok(());
        };

        let mut buf = Vec::new();
        for event in &events {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }

        let io_err = |source: std::io::Error| TelemetryError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_err)?;
        file.write_all(&buf).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        tracing::debug!(count = events.len(), path = %path.display(), "telemetry flushed");
        Ok(())
    }
}
