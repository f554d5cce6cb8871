//! Git implementation of the VersionControl port.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::VersionControl;

/// Shells out to the `git` binary in the plan's working directory.
#[derive(Debug, Clone)]
pub struct GitVcs {
    binary: String,
}

impl GitVcs {
    /// Use `git` from `PATH`.
    pub fn new() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }

    /// Use a specific git executable.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    async fn git(&self, dir: &Path, args: &[&str]) -> DomainResult<String> {
        let output = Command::new(&self.binary)
            .current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DomainError::Vcs(format!("failed to run git {}: {e}", args.join(" "))))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::Vcs(format!(
                "git {} exited with {:?}: {}",
                args.join(" "),
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for GitVcs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionControl for GitVcs {
    async fn has_changes(&self, dir: &Path) -> DomainResult<bool> {
        let status = self.git(dir, &["status", "--porcelain", "--untracked-files=all"]).await?;
        debug!(dir = %dir.display(), dirty = !status.is_empty(), "inspected working tree");
        Ok(!status.is_empty())
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> DomainResult<String> {
        self.git(dir, &["add", "--all"]).await?;
        self.git(dir, &["commit", "--no-verify", "--quiet", "-m", message]).await?;
        let commit_id = self.git(dir, &["rev-parse", "HEAD"]).await?;
        debug!(dir = %dir.display(), commit_id = %commit_id, "committed working tree");
        Ok(commit_id)
    }
}
