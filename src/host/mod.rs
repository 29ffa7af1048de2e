//! Host integration primitives.
//!
//! This module provides:
//! - `subscription`: Disposable subscriptions and broadcast listener loops
//! - `context`: Extension context with scoped resource release

pub mod context;
pub mod subscription;

pub use context::{ExtensionContext, HostError, LogNotifier, Notifier, UriHandler};
pub use subscription::{listen, Subscription};
