//! Activation and handler error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::host::HostError;
use crate::managers::CredentialError;
use crate::scm::ScmError;

/// Failures that abort activation.
#[derive(Error, Debug)]
pub enum ActivationError {
    /// Loading configuration failed.
    #[error("failed to load configuration")]
    Configuration(#[from] ConfigError),

    /// Change detection could not be wired.
    #[error("failed to watch configuration for changes")]
    ConfigurationWatch(#[source] ConfigError),

    /// The provider went away while waiting for a repository.
    #[error("source control closed before any repository was selected")]
    SourceControlClosed,

    /// The orchestrator was shut down mid-activation.
    #[error("orchestrator shut down before activation completed")]
    ShutDown,

    /// A host registration was refused.
    #[error("failed to register with the host")]
    Host(#[from] HostError),
}

/// Failures inside the configuration-change handler.
///
/// These never escape the handler; they are reported to the user instead.
#[derive(Error, Debug)]
pub enum RefreshError {
    /// The credential cache could not be cleared.
    #[error("failed to clear cached credentials")]
    Credentials(#[from] CredentialError),

    /// The active repository could not refresh its status.
    #[error("failed to refresh repository status")]
    Status(#[from] ScmError),
}

/// Render an error and its causes as `outer: cause: root cause`.
pub fn format_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        let text = cause.to_string();
        // Some messages already embed their cause.
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }

    message
}
