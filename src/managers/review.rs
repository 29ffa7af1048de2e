//! Review-session manager bound to the active repository.

use std::sync::Arc;

use crate::config::Configuration;
use crate::host::ExtensionContext;
use crate::scm::Repository;
use crate::telemetry::Telemetry;

use super::credentials::CredentialCache;
use super::pull_requests::PullRequestManager;

/// Manages review sessions for the active repository.
pub struct ReviewManager {
    context: Arc<ExtensionContext>,
    configuration: Configuration,
    repository: Arc<dyn Repository>,
    credentials: Arc<CredentialCache>,
    telemetry: Arc<dyn Telemetry>,
}

impl ReviewManager {
    /// Shares the pull-request manager's credential cache.
    pub fn new(
        context: Arc<ExtensionContext>,
        configuration: Configuration,
        repository: Arc<dyn Repository>,
        pull_requests: &PullRequestManager,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            context,
            configuration,
            repository,
            credentials: Arc::clone(pull_requests.credentials()),
            telemetry,
        }
    }

    /// The repository this manager is bound to.
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Rebind to `repository`.
    pub fn set_repository(&mut self, repository: Arc<dyn Repository>) {
        tracing::debug!(
            from = %self.repository.id(),
            to = %repository.id(),
            "review manager switching repository"
        );
        self.repository = repository;
    }

    /// Host context.
    pub fn context(&self) -> &Arc<ExtensionContext> {
        &self.context
    }

    /// Live configuration handle.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Credential cache shared with the pull-request manager.
    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Telemetry session.
    pub fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry
    }
}
