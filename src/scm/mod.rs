//! Version-control provider surface.
//!
//! This module provides:
//! - `repository`: The `Repository` contract and the on-disk `GitRepository`
//! - `workspace`: The `SourceControl` provider contract and the `Workspace` provider

pub mod repository;
pub mod workspace;

pub use repository::{GitRepository, Repository, RepositoryId, ScmError, SelectionChange};
pub use workspace::{first_selected, SourceControl, Workspace};
