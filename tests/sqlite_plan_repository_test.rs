//! File-backed SQLite store: durability across pools and counter integrity.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cadence::adapters::sqlite::{initialize_database, SqlitePlanRepository};
use cadence::adapters::substrates::{MockResponse, MockSubstrate};
use cadence::domain::models::{Config, DatabaseConfig, ExecutionMode, PauseReason, PlanStatus, TaskStatus};
use cadence::PlanRepository;
use common::{harness_on, phase, seed, task};
use tempfile::TempDir;

async fn open(dir: &TempDir) -> Arc<SqlitePlanRepository> {
    let config = DatabaseConfig {
        path: dir.path().join("state").join("cadence.db").to_string_lossy().into_owned(),
        max_connections: 5,
    };
    let pool = initialize_database(&config).await.unwrap();
    Arc::new(SqlitePlanRepository::new(pool))
}

#[tokio::test]
async fn test_progress_survives_reopening_the_database() {
    let dir = TempDir::new().unwrap();

    let (plan_id, done, broken) = {
        let repo = open(&dir).await;
        let h = harness_on(repo, Config::default(), MockSubstrate::new());
        let seeded = seed(
            h.repo.as_ref(),
            "durable",
            vec![phase("only", ExecutionMode::Sequential, vec![task("done"), task("broken")])],
        )
        .await;
        let broken = seeded.task(0, 1).id;
        h.substrate.script(broken, ["one", "two", "three"].map(MockResponse::failure));
        h.executor.execute_plan(seeded.plan.id).await.unwrap_err();
        (seeded.plan.id, seeded.task(0, 0).id, broken)
    };

    // A new process: fresh pool, fresh executor.
    let repo = open(&dir).await;
    let plan = repo.get_plan(plan_id).await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Paused);
    assert_eq!(plan.pause_reason, Some(PauseReason::TaskFailed { task_id: broken }));
    assert_eq!(plan.current_task_id, Some(broken));
    assert_eq!(plan.completed_tasks, 1);

    let stored = repo.get_task(broken).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.attempts, 3);

    let h = harness_on(repo, Config::default(), MockSubstrate::new());
    h.executor.reset_task(broken).await.unwrap();
    let plan = h.executor.resume_plan(plan_id).await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.completed_tasks, 2);
    assert!(h.substrate.invocations_for(done).is_empty());
    assert_eq!(h.substrate.invocations_for(broken).len(), 1);
}

#[tokio::test]
async fn test_parallel_completions_keep_counters_exact() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir).await;
    let h = harness_on(
        repo,
        Config::default(),
        MockSubstrate::with_default_response(MockResponse::success("ok").with_delay(Duration::from_millis(5))),
    );
    let seeded = seed(
        h.repo.as_ref(),
        "wide",
        vec![phase(
            "fan out",
            ExecutionMode::Parallel,
            (0..8).map(|_| task("worker")).collect(),
        )],
    )
    .await;

    let plan = h.executor.execute_plan(seeded.plan.id).await.unwrap();

    assert_eq!(plan.completed_tasks, 8);
    let phase = h.repo.get_phase(seeded.phases[0].id).await.unwrap().unwrap();
    assert_eq!(phase.completed_tasks, 8);
}

#[tokio::test]
async fn test_dependencies_and_flags_round_trip() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir).await;
    let seeded = seed(
        repo.as_ref(),
        "shape",
        vec![phase(
            "graph",
            ExecutionMode::Parallel,
            vec![task("root"), task("leaf").after(&[0]).serial()],
        )
        .pause_after()],
    )
    .await;

    let phases = repo.list_phases(seeded.plan.id).await.unwrap();
    assert_eq!(phases.len(), 1);
    assert!(phases[0].pause_after);
    assert_eq!(phases[0].execution_mode, ExecutionMode::Parallel);

    let tasks = repo.list_tasks(seeded.phases[0].id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].depends_on, vec![0]);
    assert!(!tasks[1].can_run_in_parallel);
    assert!(tasks[0].can_run_in_parallel);
}
