//! Common test utilities for integration tests
//!
//! Provides the executor harness, plan seeding helpers and git fixtures
//! shared across the integration test files.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use cadence::adapters::substrates::{MockResponse, MockSubstrate};
use cadence::adapters::vcs::MockVcs;
use cadence::adapters::InMemoryPlanRepository;
use cadence::domain::models::{Config, ExecutionMode, Phase, Plan, Task};
use cadence::{EventBus, PlanExecutor, PlanRepository};
use tempfile::TempDir;

/// Executor wired to mocks, with handles on every collaborator.
pub struct Harness<R: PlanRepository + 'static = InMemoryPlanRepository> {
    pub executor: Arc<PlanExecutor<R>>,
    pub repo: Arc<R>,
    pub substrate: Arc<MockSubstrate>,
    pub vcs: Arc<MockVcs>,
    pub bus: Arc<EventBus>,
}

/// In-memory harness whose agent succeeds after a short delay.
pub fn harness() -> Harness {
    harness_with(
        Config::default(),
        MockSubstrate::with_default_response(
            MockResponse::success("done").with_delay(Duration::from_millis(20)),
        ),
    )
}

pub fn harness_with(config: Config, substrate: MockSubstrate) -> Harness {
    harness_on(Arc::new(InMemoryPlanRepository::new()), config, substrate)
}

pub fn harness_on<R: PlanRepository + 'static>(
    repo: Arc<R>,
    config: Config,
    substrate: MockSubstrate,
) -> Harness<R> {
    let substrate = Arc::new(substrate);
    let vcs = Arc::new(MockVcs::new());
    let bus = Arc::new(EventBus::default());
    let executor = Arc::new(PlanExecutor::new(
        repo.clone(),
        substrate.clone(),
        vcs.clone(),
        bus.clone(),
        &config,
    ));
    Harness {
        executor,
        repo,
        substrate,
        vcs,
        bus,
    }
}

/// Declarative description of one task to seed.
#[derive(Clone)]
pub struct TaskSpec {
    pub title: &'static str,
    pub depends_on: Vec<usize>,
    pub parallel: bool,
}

pub fn task(title: &'static str) -> TaskSpec {
    TaskSpec {
        title,
        depends_on: Vec::new(),
        parallel: true,
    }
}

impl TaskSpec {
    pub fn after(mut self, deps: &[usize]) -> Self {
        self.depends_on = deps.to_vec();
        self
    }

    pub fn serial(mut self) -> Self {
        self.parallel = false;
        self
    }
}

/// Declarative description of one phase to seed.
pub struct PhaseSpec {
    pub title: &'static str,
    pub mode: ExecutionMode,
    pub pause_after: bool,
    pub tasks: Vec<TaskSpec>,
}

pub fn phase(title: &'static str, mode: ExecutionMode, tasks: Vec<TaskSpec>) -> PhaseSpec {
    PhaseSpec {
        title,
        mode,
        pause_after: false,
        tasks,
    }
}

impl PhaseSpec {
    pub fn pause_after(mut self) -> Self {
        self.pause_after = true;
        self
    }
}

/// A stored plan with its phases and tasks in order.
pub struct Seeded {
    pub plan: Plan,
    pub phases: Vec<Phase>,
    pub tasks: Vec<Vec<Task>>,
}

impl Seeded {
    pub fn task(&self, phase: usize, task: usize) -> &Task {
        &self.tasks[phase][task]
    }
}

pub async fn seed<R: PlanRepository>(repo: &R, title: &str, phases: Vec<PhaseSpec>) -> Seeded {
    seed_in(repo, title, "/work/repo", phases).await
}

/// Seed a plan whose tasks run in `working_dir`.
pub async fn seed_in<R: PlanRepository>(
    repo: &R,
    title: &str,
    working_dir: impl Into<PathBuf>,
    phases: Vec<PhaseSpec>,
) -> Seeded {
    let plan = Plan::new(title, working_dir);
    repo.create_plan(&plan).await.expect("create plan");

    let mut seeded = Seeded {
        plan,
        phases: Vec::new(),
        tasks: Vec::new(),
    };
    for (phase_order, spec) in phases.into_iter().enumerate() {
        let phase = Phase::new(seeded.plan.id, phase_order as u32, spec.title, spec.mode)
            .with_pause_after(spec.pause_after);
        repo.create_phase(&phase).await.expect("create phase");

        let mut tasks = Vec::new();
        for (task_order, t) in spec.tasks.into_iter().enumerate() {
            let task = Task::new(
                seeded.plan.id,
                phase.id,
                task_order as u32,
                t.title,
                format!("Implement {}", t.title),
            )
            .with_dependencies(t.depends_on)
            .with_parallel(t.parallel);
            repo.create_task(&task).await.expect("create task");
            tasks.push(task);
        }
        seeded.phases.push(phase);
        seeded.tasks.push(tasks);
    }
    seeded
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for a condition to be true, polling every 10ms.
pub async fn wait_for<F>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

/// Setup a git repository in a temp directory for testing
///
/// Creates an initialized git repo with an initial empty commit.
/// Returns the TempDir (for lifetime management) and the path to the repo.
pub fn setup_test_git_repo() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir for git repo");
    let path = dir.path().to_path_buf();

    git(&path, &["init", "--quiet"]);
    git(&path, &["config", "user.email", "test@test.com"]);
    git(&path, &["config", "user.name", "Test User"]);
    git(&path, &["config", "commit.gpgsign", "false"]);
    git(&path, &["commit", "--allow-empty", "--quiet", "-m", "initial commit"]);

    (dir, path)
}

/// Run git in `dir` and return trimmed stdout, panicking on failure.
pub fn git(dir: &std::path::Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
