//! End-to-end behavior of the activation orchestrator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::tempdir;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use review_activation::activation::{Lifecycle, Orchestrator, OrchestratorBuilder, STARTUP_EVENT};
use review_activation::config::{
    ConfigError, Configuration, ConfigurationChange, ConfigurationSource, HostSettings,
    MemoryConfigurationSource, Settings,
};
use review_activation::error::ActivationError;
use review_activation::host::{ExtensionContext, Notifier, Subscription};
use review_activation::managers::{CredentialError, CredentialStore, Credentials};
use review_activation::scm::{Repository, RepositoryId, Workspace};
use review_activation::telemetry::{JsonlTelemetry, Telemetry, TelemetryError};

const DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn show_error_message(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

struct UnreachableStore;

#[async_trait]
impl CredentialStore for UnreachableStore {
    async fn lookup(&self, _host: &str) -> Result<Option<Credentials>, CredentialError> {
        Ok(None)
    }

    async fn invalidate(&self) -> Result<(), CredentialError> {
        Err(CredentialError::Unavailable("keychain locked".into()))
    }
}

struct Harness {
    context: Arc<ExtensionContext>,
    notifier: Arc<RecordingNotifier>,
    workspace: Arc<Workspace>,
    config: Arc<MemoryConfigurationSource>,
    telemetry: Arc<JsonlTelemetry>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(MemoryConfigurationSource::new(Settings::default()))
    }

    fn with_config(config: MemoryConfigurationSource) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        Self {
            context: Arc::new(ExtensionContext::new(notifier.clone())),
            notifier,
            workspace: Arc::new(Workspace::new()),
            config: Arc::new(config),
            telemetry: Arc::new(JsonlTelemetry::in_memory()),
        }
    }

    fn builder(&self) -> OrchestratorBuilder {
        Orchestrator::builder(
            self.context.clone(),
            self.workspace.clone(),
            self.config.clone(),
            self.telemetry.clone(),
        )
        .selection_debounce(DEBOUNCE)
    }

    fn orchestrator(&self) -> Orchestrator {
        self.builder().build()
    }
}

fn active_id(orchestrator: &Orchestrator) -> Option<RepositoryId> {
    orchestrator.active_repository().map(|repo| repo.id())
}

fn manager_ids(orchestrator: &Orchestrator) -> Option<(RepositoryId, RepositoryId)> {
    orchestrator.with_managers(|m| (m.pull_requests.repository().id(), m.reviews.repository().id()))
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn git_fixture(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let root = dir.join(name);
    std::fs::create_dir_all(root.join(".git")).unwrap();
    std::fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    root
}

#[tokio::test(start_paused = true)]
async fn test_activates_with_preselected_repository() {
    let h = Harness::new();
    h.workspace.open("/ws/one", false);
    let two = h.workspace.open("/ws/two", true);
    h.workspace.open("/ws/three", true);

    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();

    assert!(orchestrator.is_active());
    assert_eq!(manager_ids(&orchestrator), Some((two.id(), two.id())));
    assert_eq!(h.telemetry.count(STARTUP_EVENT), 1);
    assert!(h.config.is_listening());
    assert!(h.context.subscription_count() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_first_selected_repository_to_open() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();

    let pending = orchestrator.clone();
    let activation = tokio::spawn(async move { pending.activate().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(orchestrator.lifecycle(), Lifecycle::Activating);
    assert!(orchestrator.active_repository().is_none());

    h.workspace.open("/ws/one", false);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(orchestrator.lifecycle(), Lifecycle::Activating);

    let two = h.workspace.open("/ws/two", true);
    activation.await.unwrap().unwrap();
    assert_eq!(active_id(&orchestrator), Some(two.id()));

    // A later selected repository does not start a second initialization.
    h.workspace.open("/ws/three", true);
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(active_id(&orchestrator), Some(two.id()));
    assert_eq!(h.telemetry.count(STARTUP_EVENT), 1);
    assert_eq!(h.config.load_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_activate_is_noop() {
    let h = Harness::new();
    h.workspace.open("/ws/one", true);
    let orchestrator = h.orchestrator();

    orchestrator.activate().await.unwrap();
    let subscriptions = h.context.subscription_count();
    orchestrator.activate().await.unwrap();

    assert_eq!(h.telemetry.count(STARTUP_EVENT), 1);
    assert_eq!(h.config.load_count(), 1);
    assert_eq!(h.context.subscription_count(), subscriptions);
}

#[tokio::test(start_paused = true)]
async fn test_selection_switch_collapses_into_one_update() {
    let h = Harness::new();
    let one = h.workspace.open("/ws/one", true);
    let two = h.workspace.open("/ws/two", false);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();
    let mut changes = orchestrator.subscribe();

    // Deselects one, then selects two.
    h.workspace.select(two.id());

    tokio::time::sleep(DEBOUNCE / 2).await;
    assert!(orchestrator.is_resolution_pending());
    assert_eq!(manager_ids(&orchestrator), Some((one.id(), one.id())));

    tokio::time::sleep(DEBOUNCE).await;
    let change = changes.try_recv().unwrap();
    assert_eq!(change.repository, two.id());
    assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(manager_ids(&orchestrator), Some((two.id(), two.id())));
}

#[tokio::test(start_paused = true)]
async fn test_rearmed_timer_reads_selection_at_fire_time() {
    let h = Harness::new();
    let one = h.workspace.open("/ws/one", true);
    let two = h.workspace.open("/ws/two", false);
    let three = h.workspace.open("/ws/three", false);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();
    let mut changes = orchestrator.subscribe();

    let step = DEBOUNCE / 2;
    one.set_selected(false);
    tokio::time::sleep(step).await;
    two.set_selected(true);
    tokio::time::sleep(step).await;
    three.set_selected(true);
    tokio::time::sleep(step).await;
    two.set_selected(false);
    tokio::time::sleep(step).await;

    // Every event landed inside the window of the previous one.
    assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(active_id(&orchestrator), Some(one.id()));

    tokio::time::sleep(DEBOUNCE).await;
    assert_eq!(changes.try_recv().unwrap().repository, three.id());
    assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(manager_ids(&orchestrator), Some((three.id(), three.id())));
}

#[tokio::test(start_paused = true)]
async fn test_nothing_selected_keeps_active_repository() {
    let h = Harness::new();
    let one = h.workspace.open("/ws/one", true);
    h.workspace.open("/ws/two", false);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();
    let mut changes = orchestrator.subscribe();

    one.set_selected(false);
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(manager_ids(&orchestrator), Some((one.id(), one.id())));
}

#[tokio::test(start_paused = true)]
async fn test_multi_selection_resolves_to_first_enumerated() {
    let h = Harness::new();
    let one = h.workspace.open("/ws/one", true);
    let two = h.workspace.open("/ws/two", false);
    let three = h.workspace.open("/ws/three", false);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();

    three.set_selected(true);
    two.set_selected(true);
    one.set_selected(false);
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(active_id(&orchestrator), Some(two.id()));
}

#[tokio::test(start_paused = true)]
async fn test_repository_opened_after_activation_is_tracked() {
    let h = Harness::new();
    h.workspace.open("/ws/one", true);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();

    let two = h.workspace.open("/ws/two", false);
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.workspace.select(two.id());
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(manager_ids(&orchestrator), Some((two.id(), two.id())));
}

#[tokio::test]
async fn test_configuration_change_clears_credentials_and_refreshes_status() {
    let dir = tempdir().unwrap();
    let h = Harness::with_config(MemoryConfigurationSource::new(Settings {
        hosts: vec![HostSettings {
            host: "github.com".into(),
            username: None,
            token: Some("first".into()),
        }],
    }));
    let repo = h.workspace.open(git_fixture(dir.path(), "one"), true);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();

    let pull_requests = orchestrator.with_managers(|m| m.pull_requests.clone()).unwrap();
    let first = pull_requests.credentials_for("github.com").await.unwrap().unwrap();
    assert_eq!(first.token, "first");
    assert_eq!(pull_requests.credentials().len(), 1);

    h.config.update(Settings {
        hosts: vec![HostSettings {
            host: "github.com".into(),
            username: None,
            token: Some("second".into()),
        }],
    });

    assert!(wait_until(|| repo.refresh_count() == 1).await);
    assert!(pull_requests.credentials().is_empty());
    assert_eq!(repo.head().as_deref(), Some("main"));
    assert!(h.notifier.messages().is_empty());

    let second = pull_requests.credentials_for("github.com").await.unwrap().unwrap();
    assert_eq!(second.token, "second");
}

#[tokio::test]
async fn test_configuration_change_failure_is_reported_not_propagated() {
    let dir = tempdir().unwrap();
    let h = Harness::new();
    let one = h.workspace.open(git_fixture(dir.path(), "one"), true);
    let two = h.workspace.open(git_fixture(dir.path(), "two"), false);
    let orchestrator = h.builder().credential_store(Arc::new(UnreachableStore)).build();
    orchestrator.activate().await.unwrap();

    h.config.notify_changed();

    assert!(wait_until(|| !h.notifier.messages().is_empty()).await);
    assert_eq!(
        h.notifier.messages(),
        vec!["failed to clear cached credentials: credential store unavailable: keychain locked"]
    );
    assert_eq!(manager_ids(&orchestrator), Some((one.id(), one.id())));
    assert_eq!(one.refresh_count(), 0);

    // The orchestrator keeps working after a failed handler.
    h.workspace.select(two.id());
    assert!(wait_until(|| active_id(&orchestrator) == Some(two.id())).await);

    h.config.notify_changed();
    assert!(wait_until(|| h.notifier.messages().len() == 2).await);
}

#[tokio::test]
async fn test_status_failure_is_reported() {
    let h = Harness::new();
    // No git metadata on disk.
    let one = h.workspace.open("/nonexistent/review-activation/one", true);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();

    h.config.notify_changed();

    assert!(wait_until(|| !h.notifier.messages().is_empty()).await);
    let message = &h.notifier.messages()[0];
    assert!(message.starts_with("failed to refresh repository status: "));
    assert!(message.contains("is not a git repository"));
    assert_eq!(active_id(&orchestrator), Some(one.id()));
}

#[tokio::test(start_paused = true)]
async fn test_configuration_change_before_activation_is_ignored() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();

    let pending = orchestrator.clone();
    let activation = tokio::spawn(async move { pending.activate().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.config.notify_changed();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.notifier.messages().is_empty());
    assert!(orchestrator.active_repository().is_none());

    let one = h.workspace.open("/ws/one", true);
    activation.await.unwrap().unwrap();
    assert_eq!(active_id(&orchestrator), Some(one.id()));
}

#[tokio::test(start_paused = true)]
async fn test_configuration_load_failure_aborts_activation() {
    let h = Harness::with_config(MemoryConfigurationSource::failing("settings unreadable"));
    h.workspace.open("/ws/one", true);
    let two = h.workspace.open("/ws/two", false);
    let orchestrator = h.orchestrator();
    let mut changes = orchestrator.subscribe();

    let err = orchestrator.activate().await.unwrap_err();
    assert!(matches!(err, ActivationError::Configuration(_)));

    assert_eq!(orchestrator.lifecycle(), Lifecycle::Idle);
    assert!(orchestrator.active_repository().is_none());
    assert_eq!(h.context.subscription_count(), 0);
    assert_eq!(h.telemetry.count(STARTUP_EVENT), 0);
    assert!(!h.config.is_listening());

    // Nothing is left listening.
    h.workspace.select(two.id());
    h.config.notify_changed();
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
    assert!(h.notifier.messages().is_empty());
}

#[derive(Default)]
struct StartupRecorder {
    orchestrator: Mutex<Option<Orchestrator>>,
    startups: AtomicUsize,
    startups_with_managers: AtomicUsize,
}

#[async_trait]
impl Telemetry for StartupRecorder {
    fn on(&self, event: &str) {
        if event != STARTUP_EVENT {
            return;
        }
        self.startups.fetch_add(1, Ordering::SeqCst);

        let managers_ready = self
            .orchestrator
            .lock()
            .as_ref()
            .and_then(|o| o.with_managers(|_| ()))
            .is_some();
        if managers_ready {
            self.startups_with_managers.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn shutdown(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_startup_event_follows_manager_construction() {
    let h = Harness::new();
    h.workspace.open("/ws/one", true);
    let recorder = Arc::new(StartupRecorder::default());

    let orchestrator = Orchestrator::builder(
        h.context.clone(),
        h.workspace.clone(),
        h.config.clone(),
        recorder.clone(),
    )
    .build();
    *recorder.orchestrator.lock() = Some(orchestrator.clone());

    orchestrator.activate().await.unwrap();
    orchestrator.activate().await.unwrap();

    assert_eq!(recorder.startups.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.startups_with_managers.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_uri_handler_rebroadcasts() {
    let h = Harness::new();
    h.workspace.open("/ws/one", true);
    let orchestrator = h.orchestrator();
    assert!(!h.context.handle_uri("review://before"));

    orchestrator.activate().await.unwrap();
    let mut uris = orchestrator.uri_events();

    assert!(h.context.handle_uri("review://auth?code=42"));
    assert_eq!(uris.try_recv().unwrap(), "review://auth?code=42");
}

#[tokio::test(start_paused = true)]
async fn test_commands_registered_once_with_managers() {
    let h = Harness::new();
    h.workspace.open("/ws/one", true);
    let registered = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&registered);
    let release_counter = Arc::clone(&released);
    let orchestrator = h
        .builder()
        .on_register_commands(move |_context, orchestrator| {
            assert!(orchestrator.active_repository().is_some());
            counter.fetch_add(1, Ordering::SeqCst);
            let release_counter = Arc::clone(&release_counter);
            vec![Subscription::new("command", move || {
                release_counter.fetch_add(1, Ordering::SeqCst);
            })]
        })
        .build();

    orchestrator.activate().await.unwrap();
    orchestrator.activate().await.unwrap();
    assert_eq!(registered.load(Ordering::SeqCst), 1);

    h.context.dispose();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_pending_resolution() {
    let h = Harness::new();
    let one = h.workspace.open("/ws/one", true);
    let two = h.workspace.open("/ws/two", false);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();
    let mut changes = orchestrator.subscribe();

    h.workspace.select(two.id());
    tokio::time::sleep(DEBOUNCE / 2).await;
    assert!(orchestrator.is_resolution_pending());

    orchestrator.shutdown();
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(active_id(&orchestrator), Some(one.id()));
}

#[tokio::test(start_paused = true)]
async fn test_disposed_context_stops_selection_tracking() {
    let h = Harness::new();
    let one = h.workspace.open("/ws/one", true);
    let two = h.workspace.open("/ws/two", false);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();
    let mut changes = orchestrator.subscribe();

    h.context.dispose();
    assert!(!h.config.is_listening());

    h.workspace.select(two.id());
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(active_id(&orchestrator), Some(one.id()));
}

#[tokio::test(start_paused = true)]
async fn test_resolve_now_bypasses_debounce() {
    let h = Harness::new();
    let one = h.workspace.open("/ws/one", true);
    let two = h.workspace.open("/ws/two", false);
    let orchestrator = h.orchestrator();
    assert_eq!(orchestrator.resolve_now(), None);

    orchestrator.activate().await.unwrap();
    one.set_selected(false);
    two.set_selected(true);

    assert_eq!(orchestrator.resolve_now(), Some(two.id()));
    assert_eq!(manager_ids(&orchestrator), Some((two.id(), two.id())));
}

/// Configuration that takes a while to load.
struct SlowSource {
    inner: MemoryConfigurationSource,
    delay: Duration,
}

#[async_trait]
impl ConfigurationSource for SlowSource {
    async fn load(&self) -> Result<Configuration, ConfigError> {
        tokio::time::sleep(self.delay).await;
        self.inner.load().await
    }

    fn on_did_change(&self) -> broadcast::Receiver<ConfigurationChange> {
        self.inner.on_did_change()
    }

    fn listen_for_changes(&self) -> Result<Subscription, ConfigError> {
        self.inner.listen_for_changes()
    }
}

#[tokio::test(start_paused = true)]
async fn test_selection_switch_during_configuration_load_is_resolved() {
    let h = Harness::new();
    h.workspace.open("/ws/one", true);
    let two = h.workspace.open("/ws/two", false);
    let orchestrator = Orchestrator::builder(
        h.context.clone(),
        h.workspace.clone(),
        Arc::new(SlowSource {
            inner: MemoryConfigurationSource::new(Settings::default()),
            delay: Duration::from_millis(50),
        }),
        h.telemetry.clone(),
    )
    .selection_debounce(DEBOUNCE)
    .build();

    let pending = orchestrator.clone();
    let activation = tokio::spawn(async move { pending.activate().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(orchestrator.lifecycle(), Lifecycle::Activating);

    h.workspace.select(two.id());
    activation.await.unwrap().unwrap();
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(manager_ids(&orchestrator), Some((two.id(), two.id())));
}

#[tokio::test(start_paused = true)]
async fn test_repository_churn_does_not_grow_subscriptions() {
    let h = Harness::new();
    h.workspace.open("/ws/one", true);
    let orchestrator = h.orchestrator();
    orchestrator.activate().await.unwrap();
    let baseline = h.context.subscription_count();
    assert_eq!(orchestrator.tracked_repository_count(), 1);

    for i in 0..5 {
        let repo = h.workspace.open(format!("/ws/transient-{i}"), false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.workspace.close_repository(repo.id());
    }
    let last = h.workspace.open("/ws/last", false);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.context.subscription_count(), baseline);
    assert_eq!(orchestrator.tracked_repository_count(), 2);

    h.workspace.select(last.id());
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(active_id(&orchestrator), Some(last.id()));

    h.context.dispose();
    assert_eq!(orchestrator.tracked_repository_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_waiting_for_repository_fails_activation() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();

    let pending = orchestrator.clone();
    let activation = tokio::spawn(async move { pending.activate().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(orchestrator.lifecycle(), Lifecycle::Activating);

    orchestrator.shutdown();
    let err = activation.await.unwrap().unwrap_err();
    assert!(matches!(err, ActivationError::ShutDown));
    assert!(orchestrator.is_shut_down());

    // A repository opening afterwards changes nothing.
    h.workspace.open("/ws/one", true);
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(orchestrator.lifecycle(), Lifecycle::Idle);
    assert!(orchestrator.active_repository().is_none());
    assert_eq!(h.context.subscription_count(), 0);
    assert_eq!(h.telemetry.count(STARTUP_EVENT), 0);
    assert_eq!(h.config.load_count(), 0);
}
