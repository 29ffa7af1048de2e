//! Collaborating subsystems bound to the active repository.
//!
//! This module provides:
//! - `credentials`: Credential stores and the LRU-bounded credential cache
//! - `pull_requests`: The pull-request manager
//! - `review`: The review-session manager

pub mod credentials;
pub mod pull_requests;
pub mod review;

use std::sync::Arc;

use crate::scm::Repository;

pub use credentials::{
    CacheStats, ConfigCredentialStore, CredentialCache, CredentialError, CredentialStore,
    Credentials,
};
pub use pull_requests::PullRequestManager;
pub use review::ReviewManager;

/// The two managers that share the active repository.
pub struct Managers {
    /// Pull-request manager.
    pub pull_requests: PullRequestManager,
    /// Review-session manager.
    pub reviews: ReviewManager,
}

impl Managers {
    /// Point both managers at `repository` in one step.
    pub fn assign_repository(&mut self, repository: Arc<dyn Repository>) {
        self.pull_requests.set_repository(Arc::clone(&repository));
        self.reviews.set_repository(repository);
    }

    /// The repository both managers are bound to.
    pub fn active_repository(&self) -> &Arc<dyn Repository> {
        self.pull_requests.repository()
    }
}
