//! Disposable subscriptions over host event streams.
//!
//! Every listener the orchestrator creates is represented by a [`Subscription`].
//! Disposing it (explicitly or by dropping it) stops the listener, so a set of
//! subscriptions can be handed to the [`ExtensionContext`](super::ExtensionContext)
//! and released in one go at teardown.

use std::fmt;
use std::future::Future;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Handle to a live listener or registration.
///
/// The dispose action runs exactly once: on [`Subscription::unsubscribe`] or
/// when the handle is dropped.
pub struct Subscription {
    name: &'static str,
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `dispose` when released.
    pub fn new<F>(name: &'static str, dispose: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name,
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Create a subscription that aborts a spawned listener task when released.
    pub fn from_task(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self::new(name, move || handle.abort())
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Release the subscription now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            tracing::trace!(subscription = self.name, "releasing subscription");
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

/// Spawn a listener that runs `handler` for every event on `rx`.
///
/// Events are handled one at a time, in order. A lagging receiver logs the
/// number of skipped events and keeps going; a closed channel ends the loop.
pub fn listen<T, F, Fut>(
    name: &'static str,
    mut rx: broadcast::Receiver<T>,
    mut handler: F,
) -> Subscription
where
    T: Clone + Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => handler(event).await,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::warn!(listener = name, skipped = count, "listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!(listener = name, "event source closed, stopping listener");
                    break;
                }
            }
        }
    });

    Subscription::from_task(name, handle)
}
