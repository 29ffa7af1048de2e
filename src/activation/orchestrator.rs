//! Activation orchestrator.
//!
//! Resolves the repository the user is working in, builds the pull-request
//! and review managers around it, and keeps both managers pointed at the
//! selected repository as the user switches between repositories.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};

use super::debounce::Debouncer;
use crate::config::ConfigurationSource;
use crate::error::{format_error, ActivationError, RefreshError};
use crate::host::{listen, ExtensionContext, Subscription, UriHandler};
use crate::managers::{CredentialStore, Managers, PullRequestManager, ReviewManager};
use crate::scm::{first_selected, Repository, RepositoryId, SelectionChange, SourceControl};
use crate::telemetry::Telemetry;

/// Quiet period before a burst of selection changes is resolved.
pub const DEFAULT_SELECTION_DEBOUNCE: Duration = Duration::from_millis(100);

/// Telemetry event emitted once managers are up.
pub const STARTUP_EVENT: &str = "startup";

const CHANGE_BUFFER: usize = 16;
const URI_BUFFER: usize = 16;

/// Published every time both managers are pointed at a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRepositoryChanged {
    /// Repository both managers now point at.
    pub repository: RepositoryId,
    /// Its working tree root.
    pub root: PathBuf,
}

/// Delegated command registration, run once managers exist.
pub type CommandRegistrar =
    Arc<dyn Fn(&ExtensionContext, &Orchestrator) -> Vec<Subscription> + Send + Sync>;

/// Where the orchestrator is in its activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not activated, or the last attempt failed.
    Idle,
    /// Waiting for a repository or loading configuration.
    Activating,
    /// Managers are up and listeners are wired.
    Active,
}

/// Re-broadcasts URIs routed to the extension.
pub struct UriEventHandler {
    tx: broadcast::Sender<String>,
}

impl UriHandler for UriEventHandler {
    fn handle_uri(&self, uri: &str) {
        tracing::debug!(uri, "received URI");
        let _ = self.tx.send(uri.to_string());
    }
}

/// Wait-once state for the initial repository.
enum Discovery {
    Pending(broadcast::Receiver<Arc<dyn Repository>>),
    Resolved(Arc<dyn Repository>),
}

impl Discovery {
    /// Check the open repositories, keeping `opened` only if none is selected.
    fn scan(scm: &dyn SourceControl, opened: broadcast::Receiver<Arc<dyn Repository>>) -> Self {
        match first_selected(scm.repositories()) {
            Some(repository) => Discovery::Resolved(repository),
            None => Discovery::Pending(opened),
        }
    }
}

/// Resets the lifecycle to idle unless activation completed.
struct ActivationGuard<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    completed: bool,
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        *self.lifecycle.lock() = if self.completed {
            Lifecycle::Active
        } else {
            Lifecycle::Idle
        };
    }
}

/// Resolves once the shutdown flag is set.
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Sender gone: nothing can shut us down any more.
            std::future::pending::<()>().await;
        }
    }
}

struct Shared {
    context: Arc<ExtensionContext>,
    scm: Arc<dyn SourceControl>,
    config_source: Arc<dyn ConfigurationSource>,
    telemetry: Arc<dyn Telemetry>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    commands: Option<CommandRegistrar>,
    managers: RwLock<Option<Managers>>,
    selection_listeners: Mutex<HashMap<RepositoryId, Subscription>>,
    debouncer: Debouncer,
    lifecycle: Mutex<Lifecycle>,
    shutdown: watch::Sender<bool>,
    changes_tx: broadcast::Sender<ActiveRepositoryChanged>,
    uri_tx: broadcast::Sender<String>,
}

impl Shared {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn schedule_resolution(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let scheduled = self.debouncer.schedule(move || {
            if let Some(shared) = weak.upgrade() {
                shared.resolve_active_repository();
            }
        });

        if !scheduled {
            tracing::debug!("orchestrator shut down, ignoring selection change");
        }
    }

    /// Point both managers at the first selected repository.
    ///
    /// Runs without suspending. With nothing selected, the current binding stays.
    fn resolve_active_repository(&self) -> Option<RepositoryId> {
        let Some(repository) = first_selected(self.scm.repositories()) else {
            tracing::debug!("no repository selected, keeping the active one");
            return None;
        };

        match &mut *self.managers.write() {
            Some(managers) => managers.assign_repository(Arc::clone(&repository)),
            None => return None,
        }

        tracing::info!(
            repository = %repository.id(),
            root = %repository.root().display(),
            "active repository changed"
        );
        let _ = self.changes_tx.send(ActiveRepositoryChanged {
            repository: repository.id(),
            root: repository.root().to_path_buf(),
        });
        Some(repository.id())
    }

    async fn refresh_after_configuration_change(&self) -> Result<(), RefreshError> {
        let bound = self
            .managers
            .read()
            .as_ref()
            .map(|m| (m.pull_requests.clone(), Arc::clone(m.active_repository())));
        let Some((pull_requests, repository)) = bound else {
            tracing::debug!("configuration changed before activation, nothing to refresh");
            return Ok(());
        };

        pull_requests.clear_credential_cache().await?;
        repository.status().await?;
        Ok(())
    }

    fn watch_selection(self: &Arc<Self>, repository: &Arc<dyn Repository>) -> Subscription {
        let weak = Arc::downgrade(self);
        listen(
            "repository-selection",
            repository.on_did_change_selection(),
            move |change: SelectionChange| {
                let weak: Weak<Shared> = weak.clone();
                async move {
                    tracing::trace!(
                        repository = %change.repository,
                        selected = change.selected,
                        "selection changed"
                    );
                    if let Some(shared) = weak.upgrade() {
                        shared.schedule_resolution();
                    }
                }
            },
        )
    }

    /// Follow `repository`'s selection, releasing listeners of closed repositories.
    fn track_repository(self: &Arc<Self>, repository: &Arc<dyn Repository>) {
        let open: HashSet<RepositoryId> = self.scm.repositories().iter().map(|r| r.id()).collect();
        let listener = self.watch_selection(repository);

        let mut listeners = self.selection_listeners.lock();
        listeners.retain(|id, _| open.contains(id));
        listeners.insert(repository.id(), listener);
    }

    fn watch_opened_repositories(
        self: &Arc<Self>,
        opened: broadcast::Receiver<Arc<dyn Repository>>,
    ) -> Subscription {
        let weak = Arc::downgrade(self);
        listen(
            "repository-opened",
            opened,
            move |repository: Arc<dyn Repository>| {
                let weak: Weak<Shared> = weak.clone();
                async move {
                    let Some(shared) = weak.upgrade() else {
                        return;
                    };
                    tracing::debug!(repository = %repository.id(), "watching new repository");
                    shared.track_repository(&repository);
                    if repository.is_selected() {
                        shared.schedule_resolution();
                    }
                }
            },
        )
    }

    fn watch_configuration(self: &Arc<Self>) -> Subscription {
        let weak = Arc::downgrade(self);
        listen(
            "configuration-change",
            self.config_source.on_did_change(),
            move |_change| {
                let weak: Weak<Shared> = weak.clone();
                async move {
                    let Some(shared) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = shared.refresh_after_configuration_change().await {
                        let message = format_error(&e);
                        tracing::warn!("configuration change handling failed: {}", message);
                        shared.context.show_error_message(&message);
                    }
                }
            },
        )
    }
}

/// Decides which repository is active and tells the managers.
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Start building an orchestrator over the host's collaborators.
    pub fn builder(
        context: Arc<ExtensionContext>,
        scm: Arc<dyn SourceControl>,
        config_source: Arc<dyn ConfigurationSource>,
        telemetry: Arc<dyn Telemetry>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            context,
            scm,
            config_source,
            telemetry,
            selection_debounce: DEFAULT_SELECTION_DEBOUNCE,
            credential_store: None,
            commands: None,
        }
    }

    /// Resolve the initial repository and bring up the managers.
    ///
    /// Waits for a selected repository to open if none is selected yet.
    /// Calling this again while activating or active does nothing. On error,
    /// every listener created by the attempt is released.
    pub async fn activate(&self) -> Result<(), ActivationError> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if *lifecycle != Lifecycle::Idle {
                tracing::debug!(state = ?*lifecycle, "already activated");
                return Ok(());
            }
            *lifecycle = Lifecycle::Activating;
        }

        let mut guard = ActivationGuard {
            lifecycle: &self.shared.lifecycle,
            completed: false,
        };
        self.run_activation().await?;
        guard.completed = true;
        Ok(())
    }

    async fn run_activation(&self) -> Result<(), ActivationError> {
        let shared = &self.shared;
        let mut wiring: Vec<Subscription> = Vec::new();

        wiring.push(shared.watch_configuration());

        let repository = self.discover_repository().await?;
        tracing::info!(
            repository = %repository.id(),
            root = %repository.root().display(),
            "initial repository resolved"
        );

        let configuration = shared.config_source.load().await?;
        // No suspension point past here.
        if shared.is_shut_down() {
            tracing::debug!("orchestrator shut down while activating");
            return Err(ActivationError::ShutDown);
        }
        wiring.push(
            shared
                .config_source
                .listen_for_changes()
                .map_err(ActivationError::ConfigurationWatch)?,
        );

        let uri_handler = Arc::new(UriEventHandler {
            tx: shared.uri_tx.clone(),
        });
        wiring.push(shared.context.register_uri_handler(uri_handler)?);

        let pull_requests = match &shared.credential_store {
            Some(store) => PullRequestManager::with_credential_store(
                configuration.clone(),
                Arc::clone(&repository),
                Arc::clone(&shared.telemetry),
                Arc::clone(store),
            ),
            None => PullRequestManager::new(
                configuration.clone(),
                Arc::clone(&repository),
                Arc::clone(&shared.telemetry),
            ),
        };
        let reviews = ReviewManager::new(
            Arc::clone(&shared.context),
            configuration,
            Arc::clone(&repository),
            &pull_requests,
            Arc::clone(&shared.telemetry),
        );
        *shared.managers.write() = Some(Managers {
            pull_requests,
            reviews,
        });

        let weak = Arc::downgrade(shared);
        wiring.push(Subscription::new("repository-selection", move || {
            if let Some(shared) = weak.upgrade() {
                shared.selection_listeners.lock().clear();
            }
        }));
        let opened = shared.scm.on_did_open_repository();
        for repo in shared.scm.repositories() {
            shared.track_repository(&repo);
        }
        wiring.push(shared.watch_opened_repositories(opened));

        // Selection may have moved while configuration was loading.
        if let Some(selected) = first_selected(shared.scm.repositories()) {
            if selected.id() != repository.id() {
                tracing::debug!(
                    repository = %selected.id(),
                    "selection changed during activation, scheduling resolution"
                );
                shared.schedule_resolution();
            }
        }

        if let Some(register) = &shared.commands {
            wiring.extend(register(&shared.context, self));
        }

        shared.context.extend_subscriptions(wiring);
        shared.telemetry.on(STARTUP_EVENT);
        tracing::info!(repository = %repository.id(), "activation complete");
        Ok(())
    }

    async fn discover_repository(&self) -> Result<Arc<dyn Repository>, ActivationError> {
        let scm = self.shared.scm.as_ref();
        let mut discovery = Discovery::scan(scm, scm.on_did_open_repository());
        let shutdown = wait_for_shutdown(self.shared.shutdown.subscribe());
        tokio::pin!(shutdown);

        if matches!(discovery, Discovery::Pending(_)) {
            tracing::info!("no repository selected yet, waiting for one to open");
        }

        loop {
            discovery = match discovery {
                Discovery::Resolved(repository) => return Ok(repository),
                Discovery::Pending(mut opened) => {
                    let received = tokio::select! {
                        received = opened.recv() => received,
                        _ = &mut shutdown => return Err(ActivationError::ShutDown),
                    };
                    match received {
                        Ok(repository) if repository.is_selected() => {
                            Discovery::Resolved(repository)
                        }
                        Ok(repository) => {
                            tracing::debug!(
                                repository = %repository.id(),
                                "opened repository is not selected, still waiting"
                            );
                            Discovery::Pending(opened)
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "missed repository-opened events, rescanning");
                            Discovery::scan(scm, opened)
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(ActivationError::SourceControlClosed)
                        }
                    }
                }
            };
        }
    }

    /// Re-resolve the active repository immediately, bypassing the debounce.
    pub fn resolve_now(&self) -> Option<RepositoryId> {
        self.shared.resolve_active_repository()
    }

    /// Where activation stands.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.lock()
    }

    /// Whether activation completed.
    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    /// The repository both managers are bound to.
    pub fn active_repository(&self) -> Option<Arc<dyn Repository>> {
        self.with_managers(|m| Arc::clone(m.active_repository()))
    }

    /// Run `f` against the managers, if they exist yet.
    pub fn with_managers<R>(&self, f: impl FnOnce(&Managers) -> R) -> Option<R> {
        self.shared.managers.read().as_ref().map(f)
    }

    /// Whether a selection change is waiting out the debounce delay.
    pub fn is_resolution_pending(&self) -> bool {
        self.shared.debouncer.is_pending()
    }

    /// Active-repository change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ActiveRepositoryChanged> {
        self.shared.changes_tx.subscribe()
    }

    /// URIs routed to the extension by the host.
    pub fn uri_events(&self) -> broadcast::Receiver<String> {
        self.shared.uri_tx.subscribe()
    }

    /// Number of repositories whose selection is being followed.
    pub fn tracked_repository_count(&self) -> usize {
        self.shared.selection_listeners.lock().len()
    }

    /// The host context this orchestrator registers with.
    pub fn context(&self) -> &Arc<ExtensionContext> {
        &self.shared.context
    }

    /// The telemetry session shared with the managers.
    pub fn telemetry(&self) -> Arc<dyn Telemetry> {
        Arc::clone(&self.shared.telemetry)
    }

    /// Stop reacting to selection changes. A pending resolution is dropped.
    ///
    /// An activation still in progress fails with [`ActivationError::ShutDown`]
    /// instead of wiring listeners.
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        self.shared.debouncer.close();
        tracing::debug!("orchestrator shut down");
    }

    /// Whether [`Orchestrator::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Whether both handles refer to the same orchestrator.
    pub fn ptr_eq(&self, other: &Orchestrator) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    context: Arc<ExtensionContext>,
    scm: Arc<dyn SourceControl>,
    config_source: Arc<dyn ConfigurationSource>,
    telemetry: Arc<dyn Telemetry>,
    selection_debounce: Duration,
    credential_store: Option<Arc<dyn CredentialStore>>,
    commands: Option<CommandRegistrar>,
}

impl OrchestratorBuilder {
    /// Quiet period before selection churn is resolved.
    pub fn selection_debounce(mut self, delay: Duration) -> Self {
        self.selection_debounce = delay;
        self
    }

    /// Credential store for the pull-request manager. Defaults to the configuration.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Register commands once the managers exist.
    pub fn on_register_commands<F>(mut self, register: F) -> Self
    where
        F: Fn(&ExtensionContext, &Orchestrator) -> Vec<Subscription> + Send + Sync + 'static,
    {
        self.commands = Some(Arc::new(register));
        self
    }

    /// Build the orchestrator. Nothing is wired until [`Orchestrator::activate`].
    pub fn build(self) -> Orchestrator {
        let (changes_tx, _) = broadcast::channel(CHANGE_BUFFER);
        let (uri_tx, _) = broadcast::channel(URI_BUFFER);
        let (shutdown, _) = watch::channel(false);

        Orchestrator {
            shared: Arc::new(Shared {
                context: self.context,
                scm: self.scm,
                config_source: self.config_source,
                telemetry: self.telemetry,
                credential_store: self.credential_store,
                commands: self.commands,
                managers: RwLock::new(None),
                selection_listeners: Mutex::new(HashMap::new()),
                debouncer: Debouncer::new(self.selection_debounce),
                lifecycle: Mutex::new(Lifecycle::Idle),
                shutdown,
                changes_tx,
                uri_tx,
            }),
        }
    }
}
