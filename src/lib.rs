//! Review Activation
//!
//! This crate decides which source-control repository a pull-request review
//! integration is working against, and keeps the collaborating subsystems
//! pointed at it while the user moves between repositories in a
//! multi-repository workspace.
//!
//! ## Responsibilities
//!
//! 1. **Initial discovery**: use the first selected repository, or wait for the
//!    first selected repository to open (and stop listening after that)
//! 2. **Bootstrap**: load configuration, build the pull-request and review
//!    managers, register the URI handler, emit `startup` telemetry
//! 3. **Selection tracking**: collapse selection churn with a debounce timer and
//!    re-point both managers at the selected repository in one step
//! 4. **Configuration changes**: clear cached credentials and refresh the active
//!    repository, reporting failures to the user instead of propagating them
//!
//! ## Flow
//!
//! ```text
//! Repository selection changed (R1 deselected, R2 selected)
//!        ↓
//! Debouncer::schedule() [cancels the pending timer]
//!        ↓
//! quiet for the debounce delay
//!        ↓
//! first_selected(scm.repositories()) [read fresh at fire time]
//!        ↓
//! Managers::assign_repository() [both managers, one write]
//!        ↓
//! broadcast::send(ActiveRepositoryChanged)
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use review_activation::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = Arc::new(ExtensionContext::new(Arc::new(LogNotifier)));
//!     let workspace = Arc::new(Workspace::new());
//!     workspace.open_repository("/path/to/repo");
//!
//!     let orchestrator = Orchestrator::builder(
//!         context.clone(),
//!         workspace.clone(),
//!         Arc::new(FileConfigurationSource::new("/path/to/settings.json")),
//!         Arc::new(JsonlTelemetry::in_memory()),
//!     )
//!     .build();
//!
//!     let orchestrator = review_activation::extension::activate(orchestrator).await?;
//!     let mut changes = orchestrator.subscribe();
//!
//!     while let Ok(change) = changes.recv().await {
//!         println!("now reviewing {}", change.root.display());
//!     }
//!
//!     review_activation::extension::deactivate().await?;
//!     context.dispose();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`activation`]: Orchestrator and selection debouncer
//! - [`config`]: Settings, configuration sources and the settings watcher
//! - [`host`]: Subscriptions and the extension context
//! - [`managers`]: Pull-request and review managers, credential cache
//! - [`scm`]: Repositories and the workspace provider
//! - [`telemetry`]: Telemetry sink
//! - [`extension`]: Process-wide activate/deactivate

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod activation;
pub mod config;
pub mod error;
pub mod extension;
pub mod host;
pub mod managers;
pub mod scm;
pub mod telemetry;

/// Re-exports for convenience.
pub mod prelude {
    pub use crate::activation::{ActiveRepositoryChanged, Orchestrator, OrchestratorBuilder};
    pub use crate::config::{
        Configuration, ConfigurationSource, FileConfigurationSource, MemoryConfigurationSource,
        Settings,
    };
    pub use crate::error::{format_error, ActivationError};
    pub use crate::host::{ExtensionContext, LogNotifier, Notifier, Subscription};
    pub use crate::managers::{Managers, PullRequestManager, ReviewManager};
    pub use crate::scm::{Repository, RepositoryId, SourceControl, Workspace};
    pub use crate::telemetry::{JsonlTelemetry, Telemetry};
}
