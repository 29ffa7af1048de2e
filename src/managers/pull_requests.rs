//! Pull-request manager bound to the active repository.

use std::sync::Arc;

use crate::config::Configuration;
use crate::scm::Repository;
use crate::telemetry::Telemetry;

use super::credentials::{
    ConfigCredentialStore, CredentialCache, CredentialError, CredentialStore, Credentials,
    DEFAULT_CREDENTIAL_CAPACITY,
};

/// Tracks pull requests for the active repository.
///
/// Cloning is cheap: clones share the configuration, the credential cache and
/// the telemetry session, and carry their own repository binding.
#[derive(Clone)]
pub struct PullRequestManager {
    configuration: Configuration,
    repository: Arc<dyn Repository>,
    credentials: Arc<CredentialCache>,
    telemetry: Arc<dyn Telemetry>,
}

impl PullRequestManager {
    /// Create a manager that reads credentials from the configuration.
    pub fn new(
        configuration: Configuration,
        repository: Arc<dyn Repository>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let store = Arc::new(ConfigCredentialStore::new(configuration.clone()));
        Self::with_credential_store(configuration, repository, telemetry, store)
    }

    /// Create a manager with a custom credential store.
    pub fn with_credential_store(
        configuration: Configuration,
        repository: Arc<dyn Repository>,
        telemetry: Arc<dyn Telemetry>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            configuration,
            repository,
            credentials: Arc::new(CredentialCache::new(store, DEFAULT_CREDENTIAL_CAPACITY)),
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
            "pull request manager switching repository"
        );
        self.repository = repository;
    }

    /// Live configuration handle.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Credential cache, shared with the review manager.
    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Telemetry session.
    pub fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry
    }

    /// Credentials for `host`, cached.
    pub async fn credentials_for(&self, host: &str) -> Result<Option<Credentials>, CredentialError> {
        self.credentials.get(host).await
    }

    /// Forget cached credentials so the next lookup sees current settings.
    pub async fn clear_credential_cache(&self) -> Result<(), CredentialError> {
        self.credentials.clear().await
    }
}
