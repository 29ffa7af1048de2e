//! Activation orchestration.
//!
//! This module provides:
//! - `debounce`: The cancel-and-replace selection timer
//! - `orchestrator`: Initial discovery, manager wiring and active-repository tracking

pub mod debounce;
pub mod orchestrator;

pub use debounce::Debouncer;
pub use orchestrator::{
    ActiveRepositoryChanged, CommandRegistrar, Lifecycle, Orchestrator, OrchestratorBuilder,
    UriEventHandler, DEFAULT_SELECTION_DEBOUNCE, STARTUP_EVENT,
};
