//! Version control port.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::errors::DomainResult;

/// Working-tree inspection and commit operations on a repository clone.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Whether the working tree has uncommitted changes (tracked or untracked).
    async fn has_changes(&self, dir: &Path) -> DomainResult<bool>;

    /// Stage everything and commit, returning the new commit id.
    async fn commit_all(&self, dir: &Path, message: &str) -> DomainResult<String>;
}
