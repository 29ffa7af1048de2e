//! Extension context handed to the orchestrator by the host.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::subscription::Subscription;

/// Errors raised by host registrations.
#[derive(Error, Debug)]
pub enum HostError {
    /// Only one URI handler may be installed.
    #[error("a URI handler is already registered")]
    UriHandlerAlreadyRegistered,

    /// The context was already disposed.
    #[error("extension context has been disposed")]
    Disposed,
}

/// User-visible notification surface.
pub trait Notifier: Send + Sync {
    /// Show an error message to the user without blocking.
    fn show_error_message(&self, message: &str);
}

/// Notifier that reports through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_error_message(&self, message: &str) {
        tracing::error!(target: "notification", "{}", message);
    }
}

/// Receiver for URIs the host routes to this extension.
pub trait UriHandler: Send + Sync {
    /// Handle one routed URI.
    fn handle_uri(&self, uri: &str);
}

type UriSlot = Arc<Mutex<Option<Arc<dyn UriHandler>>>>;

/// Scoped resources for one extension activation.
///
/// Subscriptions pushed here live until [`ExtensionContext::dispose`], which
/// releases them in reverse registration order.
pub struct ExtensionContext {
    notifier: Arc<dyn Notifier>,
    storage_path: Option<PathBuf>,
    subscriptions: Mutex<Vec<Subscription>>,
    uri_handler: UriSlot,
    disposed: AtomicBool,
}

impl ExtensionContext {
    /// Create a context reporting through `notifier`.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            storage_path: None,
            subscriptions: Mutex::new(Vec::new()),
            uri_handler: Arc::new(Mutex::new(None)),
            disposed: AtomicBool::new(false),
        }
    }

    /// Set the directory where the extension may persist state.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Directory for persisted state, if one was given.
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    /// The user-visible notification surface.
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Show `message` to the user as an error.
    pub fn show_error_message(&self, message: &str) {
        self.notifier.show_error_message(message);
    }

    /// Register a subscription for release at teardown.
    ///
    /// After disposal, the subscription is released immediately.
    pub fn push_subscription(&self, subscription: Subscription) {
        if self.is_disposed() {
            tracing::debug!(
                subscription = subscription.name(),
                "context disposed, releasing late subscription"
            );
            subscription.unsubscribe();
            return;
        }
        self.subscriptions.lock().push(subscription);
    }

    /// Register several subscriptions at once.
    pub fn extend_subscriptions(&self, subscriptions: impl IntoIterator<Item = Subscription>) {
        for subscription in subscriptions {
            self.push_subscription(subscription);
        }
    }

    /// Number of subscriptions currently held.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Install the single URI handler for this extension.
    pub fn register_uri_handler(
        &self,
        handler: Arc<dyn UriHandler>,
    ) -> Result<Subscription, HostError> {
        if self.is_disposed() {
            return Err(HostError::Disposed);
        }

        {
            let mut slot = self.uri_handler.lock();
            if slot.is_some() {
                return Err(HostError::UriHandlerAlreadyRegistered);
            }
            *slot = Some(handler);
        }

        let slot = Arc::clone(&self.uri_handler);
        Ok(Subscription::new("uri-handler", move || {
            slot.lock().take();
        }))
    }

    /// Route a URI to the registered handler. Returns `false` if none is installed.
    pub fn handle_uri(&self, uri: &str) -> bool {
        let handler = self.uri_handler.lock().clone();
        match handler {
            Some(handler) => {
                handler.handle_uri(uri);
                true
            }
            None => {
                tracing::debug!(uri, "no URI handler registered");
                false
            }
        }
    }

    /// Whether [`ExtensionContext::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Release every registered subscription.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        tracing::debug!(count = subscriptions.len(), "disposing extension context");
        for subscription in subscriptions.into_iter().rev() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for ExtensionContext {
    fn drop(&mut self) {
        self.dispose();
    }
}
