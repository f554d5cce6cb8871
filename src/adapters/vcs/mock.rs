//! Mock version control for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::VersionControl;

/// One commit made through the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCommit {
    /// Working directory committed in.
    pub dir: PathBuf,
    /// Full commit message.
    pub message: String,
    /// Fake sequential id.
    pub commit_id: String,
}

#[derive(Default)]
struct MockVcsState {
    /// Scripted answers for `has_changes`; falls back to `dirty_by_default`.
    changes: VecDeque<bool>,
    commits: Vec<MockCommit>,
    fail_next_commit: Option<String>,
}

/// In-memory VCS: reports a dirty tree unless told otherwise and hands out
/// sequential fake commit ids.
pub struct MockVcs {
    state: Mutex<MockVcsState>,
    dirty_by_default: bool,
}

impl MockVcs {
    /// VCS that reports changes on every inspection.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockVcsState::default()),
            dirty_by_default: true,
        }
    }

    /// A VCS whose working tree never changes.
    pub fn clean() -> Self {
        Self {
            dirty_by_default: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockVcsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script the next `has_changes` answer.
    pub fn push_has_changes(&self, changed: bool) {
        self.lock().changes.push_back(changed);
    }

    /// Make the next commit fail with `message`.
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        self.lock().fail_next_commit = Some(message.into());
    }

    /// Commits made so far.
    pub fn commits(&self) -> Vec<MockCommit> {
        self.lock().commits.clone()
    }
}

impl Default for MockVcs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionControl for MockVcs {
    async fn has_changes(&self, _dir: &Path) -> DomainResult<bool> {
        Ok(self.lock().changes.pop_front().unwrap_or(self.dirty_by_default))
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> DomainResult<String> {
        let mut state = self.lock();
        if let Some(error) = state.fail_next_commit.take() {
            return Err(DomainError::Vcs(error));
        }
        let commit_id = format!("{:040x}", state.commits.len() + 1);
        state.commits.push(MockCommit {
            dir: dir.to_path_buf(),
            message: message.to_string(),
            commit_id: commit_id.clone(),
        });
        Ok(commit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_ids_are_sequential() {
        let vcs = MockVcs::new();
        let dir = Path::new("/repo");
        assert!(vcs.has_changes(dir).await.unwrap());

        let first = vcs.commit_all(dir, "one").await.unwrap();
        let second = vcs.commit_all(dir, "two").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(first.len(), 40);
        assert_eq!(vcs.commits()[1].message, "two");
    }

    #[tokio::test]
    async fn test_scripted_changes_then_default() {
        let vcs = MockVcs::clean();
        vcs.push_has_changes(true);
        let dir = Path::new("/repo");
        assert!(vcs.has_changes(dir).await.unwrap());
        assert!(!vcs.has_changes(dir).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_failure_is_vcs_error() {
        let vcs = MockVcs::new();
        vcs.fail_next_commit("index.lock exists");
        let err = vcs.commit_all(Path::new("/repo"), "m").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(vcs.commit_all(Path::new("/repo"), "m").await.is_ok());
    }
}
