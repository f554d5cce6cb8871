//! Git adapter against real temporary repositories.

mod common;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cadence::adapters::sqlite::{create_migrated_test_pool, SqlitePlanRepository};
use cadence::adapters::vcs::GitVcs;
use cadence::domain::models::{Config, ExecutionMode, PlanStatus, SubstrateOutput, SubstrateRequest, TaskStatus};
use cadence::{DomainError, DomainResult, EventBus, PlanExecutor, PlanRepository, Substrate, VersionControl};
use common::{git, phase, seed_in, setup_test_git_repo, task};
use tokio::sync::mpsc;

/// Agent stand-in that writes one file per task into the working tree.
struct FileWriter {
    skip_titles: Vec<&'static str>,
}

#[async_trait]
impl Substrate for FileWriter {
    fn name(&self) -> &'static str {
        "file-writer"
    }

    async fn is_available(&self) -> DomainResult<bool> {
        Ok(true)
    }

    async fn execute(&self, request: SubstrateRequest, output_tx: mpsc::Sender<String>) -> DomainResult<SubstrateOutput> {
        if self.skip_titles.iter().any(|t| request.prompt.contains(&format!("Implement {t}"))) {
            return Ok(SubstrateOutput::new("nothing to do"));
        }
        let file = request.working_dir.join(format!("{}.txt", request.task_id));
        tokio::fs::write(&file, request.prompt.as_bytes())
            .await
            .map_err(|e| DomainError::AgentInvocation(e.to_string()))?;
        let _ = output_tx.send(format!("wrote {}", file.display())).await;
        Ok(SubstrateOutput::new("done"))
    }
}

fn commit_count(dir: &Path) -> usize {
    git(dir, &["rev-list", "--count", "HEAD"]).parse().unwrap()
}

#[tokio::test]
async fn test_has_changes_sees_untracked_and_modified_files() {
    let (_dir, path) = setup_test_git_repo();
    let vcs = GitVcs::new();

    assert!(!vcs.has_changes(&path).await.unwrap());

    std::fs::write(path.join("new.rs"), "fn main() {}").unwrap();
    assert!(vcs.has_changes(&path).await.unwrap());

    git(&path, &["add", "new.rs"]);
    git(&path, &["commit", "--quiet", "-m", "add new.rs"]);
    assert!(!vcs.has_changes(&path).await.unwrap());

    std::fs::write(path.join("new.rs"), "fn main() { println!(); }").unwrap();
    assert!(vcs.has_changes(&path).await.unwrap());
}

#[tokio::test]
async fn test_commit_all_returns_head() {
    let (_dir, path) = setup_test_git_repo();
    let vcs = GitVcs::new();
    std::fs::create_dir(path.join("src")).unwrap();
    std::fs::write(path.join("src/lib.rs"), "pub fn answer() -> u8 { 42 }").unwrap();

    let commit_id = vcs.commit_all(&path, "Add answer\n\nPlan: demo").await.unwrap();

    assert_eq!(commit_id.len(), 40);
    assert_eq!(commit_id, git(&path, &["rev-parse", "HEAD"]));
    assert_eq!(git(&path, &["log", "-1", "--format=%s"]), "Add answer");
    assert!(!vcs.has_changes(&path).await.unwrap());
}

#[tokio::test]
async fn test_git_failures_map_to_vcs_errors() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = GitVcs::new();
    assert!(matches!(vcs.has_changes(dir.path()).await, Err(DomainError::Vcs(_))));

    let (_repo, path) = setup_test_git_repo();
    // Nothing staged: git refuses an empty commit.
    assert!(matches!(vcs.commit_all(&path, "empty").await, Err(DomainError::Vcs(_))));

    let missing = GitVcs::with_binary("definitely-not-git");
    assert!(matches!(missing.has_changes(&path).await, Err(DomainError::Vcs(_))));
}

#[tokio::test]
async fn test_plan_commits_each_changing_task() {
    let (_dir, path) = setup_test_git_repo();
    let repo = Arc::new(SqlitePlanRepository::new(create_migrated_test_pool().await.unwrap()));
    let executor = PlanExecutor::new(
        repo.clone(),
        Arc::new(FileWriter {
            skip_titles: vec!["docs"],
        }),
        Arc::new(GitVcs::new()),
        Arc::new(EventBus::default()),
        &Config::default(),
    );
    let seeded = seed_in(
        repo.as_ref(),
        "Git plan",
        path.clone(),
        vec![
            phase("one", ExecutionMode::Sequential, vec![task("schema"), task("docs")]),
            phase("two", ExecutionMode::Parallel, vec![task("api"), task("cli")]),
        ],
    )
    .await;

    let plan = executor.execute_plan(seeded.plan.id).await.unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.completed_tasks, 4);

    // Parallel tasks share the tree, so one commit may carry both files.
    let commits = commit_count(&path);
    assert!((3..=4).contains(&commits), "unexpected commit count {commits}");
    assert!(git(&path, &["status", "--porcelain"]).is_empty());

    let schema = repo.get_task(seeded.task(0, 0).id).await.unwrap().unwrap();
    let commit_id = schema.commit_id.expect("schema task committed");
    assert_eq!(git(&path, &["log", "-1", "--format=%s", &commit_id]), "schema");
    assert!(git(&path, &["log", "-1", "--format=%B", &commit_id]).contains("Plan: Git plan"));

    let docs = repo.get_task(seeded.task(0, 1).id).await.unwrap().unwrap();
    assert_eq!(docs.status, TaskStatus::Completed);
    assert!(docs.commit_id.is_none());
}
