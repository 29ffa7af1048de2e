//! Workspace-level source-control provider.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::repository::{GitRepository, Repository, RepositoryId};

/// Capacity of the "repository opened" channel.
const OPENED_BUFFER: usize = 64;

/// The version-control provider contract consumed by the orchestrator.
pub trait SourceControl: Send + Sync {
    /// All open repositories, in provider enumeration order.
    fn repositories(&self) -> Vec<Arc<dyn Repository>>;

    /// Stream of newly opened repositories.
    fn on_did_open_repository(&self) -> broadcast::Receiver<Arc<dyn Repository>>;
}

/// First repository reporting `selected`, in enumeration order.
///
/// Multi-selection is not supported: ties go to whichever repository the
/// provider enumerates first.
pub fn first_selected<I>(repositories: I) -> Option<Arc<dyn Repository>>
where
    I: IntoIterator<Item = Arc<dyn Repository>>,
{
    repositories.into_iter().find(|repo| repo.is_selected())
}

/// Repositories open in a multi-folder workspace.
pub struct Workspace {
    repositories: RwLock<Vec<Arc<GitRepository>>>,
    opened_tx: broadcast::Sender<Arc<dyn Repository>>,
    next_id: AtomicU64,
}

impl Workspace {
    /// Empty workspace.
    pub fn new() -> Self {
        let (opened_tx, _) = broadcast::channel(OPENED_BUFFER);
        Self {
            repositories: RwLock::new(Vec::new()),
            opened_tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Open every folder that contains git metadata.
    pub fn discover<P: AsRef<Path>>(&self, folders: &[P]) -> Vec<Arc<GitRepository>> {
        folders
            .iter()
            .map(|folder| -> &Path { folder.as_ref() })
            .filter(|folder| folder.join(".git").exists())
            .map(|folder| self.open_repository(folder))
            .collect()
    }

    /// Open a repository, selecting it only when nothing else is selected.
    pub fn open_repository(&self, root: impl Into<PathBuf>) -> Arc<GitRepository> {
        let select = !self.has_selection();
        self.open(root, select)
    }

    /// Open a repository with an explicit initial selection state.
    ///
    /// Opening a root that is already open returns the existing repository
    /// and emits nothing.
    pub fn open(&self, root: impl Into<PathBuf>, selected: bool) -> Arc<GitRepository> {
        let root = root.into();

        let repository = {
            let mut repositories = self.repositories.write();
            if let Some(existing) = repositories.iter().find(|repo| repo.root() == root.as_path()) {
                return Arc::clone(existing);
            }

            let id = RepositoryId(self.next_id.fetch_add(1, Ordering::SeqCst));
            let repository = Arc::new(GitRepository::new(id, root, selected));
            repositories.push(Arc::clone(&repository));
            repository
        };

        tracing::info!(
            repository = %repository.id(),
            root = %repository.root().display(),
            selected,
            "repository opened"
        );
        let _ = self
            .opened_tx
            .send(Arc::clone(&repository) as Arc<dyn Repository>);

        repository
    }

    /// Close a repository, deselecting it first.
    pub fn close_repository(&self, id: RepositoryId) -> Option<Arc<GitRepository>> {
        let removed = {
            let mut repositories = self.repositories.write();
            let index = repositories.iter().position(|repo| repo.id() == id)?;
            repositories.remove(index)
        };

        removed.set_selected(false);
        tracing::info!(repository = %id, "repository closed");
        Some(removed)
    }

    /// Open repository with `id`.
    pub fn repository(&self, id: RepositoryId) -> Option<Arc<GitRepository>> {
        self.repositories
            .read()
            .iter()
            .find(|repo| repo.id() == id)
            .cloned()
    }

    /// Make `id` the only selected repository.
    ///
    /// Every other repository loses selection before the target gains it, so a
    /// switch produces a "deselected" event followed by a "selected" event.
    pub fn select(&self, id: RepositoryId) -> bool {
        let repositories = self.repositories.read().clone();
        let Some(target) = repositories.iter().find(|repo| repo.id() == id) else {
            return false;
        };

        for repo in repositories.iter().filter(|repo| repo.id() != id) {
            repo.set_selected(false);
        }
        target.set_selected(true);
        true
    }

    /// Number of open repositories.
    pub fn len(&self) -> usize {
        self.repositories.read().len()
    }

    /// Whether no repository is open.
    pub fn is_empty(&self) -> bool {
        self.repositories.read().is_empty()
    }

    fn has_selection(&self) -> bool {
        self.repositories.read().iter().any(|repo| repo.is_selected())
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceControl for Workspace {
    fn repositories(&self) -> Vec<Arc<dyn Repository>> {
        self.repositories
            .read()
            .iter()
            .map(|repo| Arc::clone(repo) as Arc<dyn Repository>)
            .collect()
    }

    fn on_did_open_repository(&self) -> broadcast::Receiver<Arc<dyn Repository>> {
        self.opened_tx.subscribe()
    }
}
