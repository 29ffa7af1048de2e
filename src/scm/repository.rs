//! Source-control repositories and their selection state.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of each repository's selection event channel.
const SELECTION_BUFFER: usize = 64;

/// Errors raised by repository operations.
#[derive(Error, Debug)]
pub enum ScmError {
    /// No usable git metadata under the root.
    #[error("{} is not a git repository", .0.display())]
    NotARepository(PathBuf),

    /// Git metadata exists but could not be read.
    #[error("failed to read git metadata at {path}: {source}")]
    Metadata {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Provider-assigned repository handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryId(pub u64);

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repo#{}", self.0)
    }
}

/// Emitted whenever a repository gains or loses selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionChange {
    /// Repository whose selection changed.
    pub repository: RepositoryId,
    /// Selection state after the change.
    pub selected: bool,
}

/// A repository exposed by the version-control provider.
///
/// Selection state is part of the contract: the orchestrator reads
/// [`Repository::is_selected`] directly to decide which repository is active.
#[async_trait]
pub trait Repository: Send + Sync + fmt::Debug {
    /// Provider-assigned identity.
    fn id(&self) -> RepositoryId;

    /// Working tree root.
    fn root(&self) -> &Path;

    /// Whether the repository is currently selected in the host UI.
    fn is_selected(&self) -> bool;

    /// Stream of selection changes for this repository.
    fn on_did_change_selection(&self) -> broadcast::Receiver<SelectionChange>;

    /// Refresh the repository status.
    async fn status(&self) -> Result<(), ScmError>;
}

/// A git working tree on disk.
pub struct GitRepository {
    id: RepositoryId,
    root: PathBuf,
    selected: AtomicBool,
    selection_tx: broadcast::Sender<SelectionChange>,
    head: RwLock<Option<String>>,
    refreshes: AtomicU64,
}

impl GitRepository {
    /// Repository at `root` with an initial selection state.
    pub fn new(id: RepositoryId, root: impl Into<PathBuf>, selected: bool) -> Self {
        let (selection_tx, _) = broadcast::channel(SELECTION_BUFFER);
        Self {
            id,
            root: root.into(),
            selected: AtomicBool::new(selected),
            selection_tx,
            head: RwLock::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Update the selection flag, emitting a change only when it flips.
    pub fn set_selected(&self, selected: bool) {
        let previous = self.selected.swap(selected, Ordering::SeqCst);
        if previous == selected {
            return;
        }

        tracing::trace!(repository = %self.id, selected, "selection changed");
        // No subscribers is fine; nobody is listening yet.
        let _ = self.selection_tx.send(SelectionChange {
            repository: self.id,
            selected,
        });
    }

    /// Branch name (or short commit for a detached head) seen by the last refresh.
    pub fn head(&self) -> Option<String> {
        self.head.read().clone()
    }

    /// Number of successful status refreshes.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Locate the git directory, following a `gitdir:` pointer for worktrees.
    async fn git_dir(&self) -> Result<PathBuf, ScmError> {
        let dot_git = self.root.join(".git");
        let metadata = tokio::fs::metadata(&dot_git)
            .await
            .map_err(|_| ScmError::NotARepository(self.root.clone()))?;

        if metadata.is_dir() {
            return Ok(dot_git);
        }

        let pointer = tokio::fs::read_to_string(&dot_git)
            .await
            .map_err(|source| ScmError::Metadata {
                path: dot_git.clone(),
                source,
            })?;

        match pointer.trim().strip_prefix("gitdir:") {
            Some(dir) => {
                let dir = PathBuf::from(dir.trim());
                Ok(if dir.is_relative() {
                    self.root.join(dir)
                } else {
                    dir
                })
            }
            None => Err(ScmError::NotARepository(self.root.clone())),
        }
    }
}

/// Parse the contents of a `HEAD` file into a display name.
fn parse_head(contents: &str) -> Option<String> {
    let contents = contents.trim();
    if let Some(reference) = contents.strip_prefix("ref:") {
        let reference = reference.trim();
        return Some(
            reference
                .strip_prefix("refs/heads/")
                .unwrap_or(reference)
                .to_string(),
        );
    }

    if contents.len() >= 8 && contents.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(contents[..8].to_string());
    }

    None
}

#[async_trait]
impl Repository for GitRepository {
    fn id(&self) -> RepositoryId {
        self.id
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn is_selected(&self) -> bool {
        self.selected.load(Ordering::SeqCst)
    }

    fn on_did_change_selection(&self) -> broadcast::Receiver<SelectionChange> {
        self.selection_tx.subscribe()
    }

    async fn status(&self) -> Result<(), ScmError> {
        let git_dir = self.git_dir().await?;
        let head_path = git_dir.join("HEAD");
        let contents = tokio::fs::read_to_string(&head_path)
            .await
            .map_err(|source| ScmError::Metadata {
                path: head_path.clone(),
                source,
            })?;

        let head = parse_head(&contents).ok_or_else(|| ScmError::NotARepository(self.root.clone()))?;
        tracing::debug!(repository = %self.id, head = %head, "status refreshed");

        *self.head.write() = Some(head);
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitRepository")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("selected", &self.is_selected())
            .finish()
    }
}
