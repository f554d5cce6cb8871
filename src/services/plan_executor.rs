//! Top-level plan driver.
//!
//! Walks a plan's phases in order, hands each one to the [`PhaseScheduler`],
//! and turns scheduler results into persisted plan state: completed, paused
//! (checkpoint, manual approval, exhausted task, stuck graph) or failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, PauseReason, Phase, PhaseStatus, Plan, PlanStatus, Task, TaskStatus,
};
use crate::domain::ports::{PlanRepository, Substrate, VersionControl};
use crate::services::activity_tracker::ActivityTracker;
use crate::services::event_bus::{EventBus, EventPayload, EventSeverity, UnifiedEvent};
use crate::services::execution_context::ExecutionContext;
use crate::services::phase_scheduler::{PhaseOutcome, PhaseScheduler};
use crate::services::retry_policy::RetryPolicy;
use crate::services::task_runner::TaskRunner;

type Registry = Arc<Mutex<HashMap<Uuid, watch::Sender<bool>>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Uuid, watch::Sender<bool>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the plan from the live registry when its execution loop ends.
struct RunGuard {
    plan_id: Uuid,
    registry: Registry,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.plan_id);
    }
}

/// Drives plans phase by phase and owns their live execution loops.
///
/// At most one loop runs per plan in a process. Every state change is
/// persisted before the matching event is published.
pub struct PlanExecutor<R>
where
    R: PlanRepository + 'static,
{
    repo: Arc<R>,
    scheduler: PhaseScheduler<R>,
    tracker: Arc<ActivityTracker>,
    event_bus: Arc<EventBus>,
    running: Registry,
}

impl<R> PlanExecutor<R>
where
    R: PlanRepository + 'static,
{
    /// Wire the services together from `config`.
    pub fn new(
        repo: Arc<R>,
        substrate: Arc<dyn Substrate>,
        vcs: Arc<dyn VersionControl>,
        event_bus: Arc<EventBus>,
        config: &Config,
    ) -> Self {
        let tracker = Arc::new(ActivityTracker::new(config.activity.clone(), event_bus.clone()));
        let runner = TaskRunner::new(
            repo.clone(),
            substrate,
            vcs,
            tracker.clone(),
            event_bus.clone(),
            config.executor.clone(),
        );
        let retry = RetryPolicy::new(repo.clone(), runner, event_bus.clone(), config.executor.max_attempts);
        let scheduler = PhaseScheduler::new(retry, event_bus.clone(), config.executor.max_concurrency);

        Self {
            repo,
            scheduler,
            tracker,
            event_bus,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Activity tracker shared by every task this executor runs.
    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    /// Bus every plan, phase and task event is published on.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Whether an execution loop is live for the plan in this process.
    pub fn is_running(&self, plan_id: Uuid) -> bool {
        lock(&self.running).contains_key(&plan_id)
    }

    /// Run a plan until it completes, pauses or fails.
    ///
    /// Completed phases and tasks are skipped, so calling this again on a
    /// paused plan continues where it stopped. A completed plan is returned
    /// unchanged.
    #[instrument(skip(self))]
    pub async fn execute_plan(&self, plan_id: Uuid) -> DomainResult<Plan> {
        self.start(plan_id, false).await
    }

    /// Resume a paused plan. A manual-approval pause approves its task.
    #[instrument(skip(self))]
    pub async fn resume_plan(&self, plan_id: Uuid) -> DomainResult<Plan> {
        self.start(plan_id, true).await
    }

    /// Fail the plan and stop its live execution loop, if any.
    #[instrument(skip(self))]
    pub async fn cancel_plan(&self, plan_id: Uuid) -> DomainResult<Plan> {
        let mut plan = self.load_plan(plan_id).await?;
        plan.status = PlanStatus::Failed;
        plan.updated_at = chrono::Utc::now();
        self.repo.update_plan(&plan).await?;

        if let Some(cancel) = lock(&self.running).get(&plan_id) {
            let _ = cancel.send(true);
            info!("signalled live execution to stop");
        }

        info!("plan cancelled");
        self.publish(EventSeverity::Warning, EventPayload::PlanCancelled { plan_id });
        Ok(plan)
    }

    /// Give a failed task a fresh set of attempts.
    #[instrument(skip(self))]
    pub async fn reset_task(&self, task_id: Uuid) -> DomainResult<Task> {
        let mut task = self
            .repo
            .get_task(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        if self.is_running(task.plan_id) {
            return Err(DomainError::PlanAlreadyRunning(task.plan_id));
        }
        if task.status != TaskStatus::Failed {
            return Err(DomainError::InvalidStateTransition {
                from: task.status.as_str().to_string(),
                to: TaskStatus::Pending.as_str().to_string(),
                reason: format!("only failed tasks can be reset; task {task_id}"),
            });
        }

        task.reset();
        self.repo.update_task(&task).await?;
        info!("task reset for another round of attempts");
        Ok(task)
    }

    async fn start(&self, plan_id: Uuid, approve: bool) -> DomainResult<Plan> {
        let plan = self.load_plan(plan_id).await?;
        match plan.status {
            PlanStatus::Completed => return Ok(plan),
            PlanStatus::Failed => {
                return Err(DomainError::InvalidStateTransition {
                    from: plan.status.as_str().to_string(),
                    to: PlanStatus::Running.as_str().to_string(),
                    reason: format!("plan {plan_id} has failed or was cancelled"),
                });
            }
            PlanStatus::Draft | PlanStatus::Running | PlanStatus::Paused => {}
        }

        let (_guard, cancel) = self.register(plan_id)?;
        let approved = if approve { plan.approved_task() } else { None };

        let plan = self
            .update_plan_with(plan_id, |p| p.transition_to(PlanStatus::Running))
            .await?;
        info!(title = %plan.title, "plan running");
        self.publish(
            EventSeverity::Info,
            EventPayload::PlanStarted {
                plan_id,
                title: plan.title.clone(),
            },
        );

        let ctx = ExecutionContext::new(plan, cancel).with_approved_task(approved);
        if let Err(err) = self.run_phases(&ctx).await {
            self.record_failure(plan_id, &err).await;
            return Err(err);
        }

        self.load_plan(plan_id).await
    }

    async fn run_phases(&self, ctx: &ExecutionContext) -> DomainResult<()> {
        let plan_id = ctx.plan_id();

        for mut phase in self.repo.list_phases(plan_id).await? {
            if phase.status == PhaseStatus::Completed {
                continue;
            }
            ctx.ensure_not_cancelled()?;

            phase.start();
            self.repo.update_phase(&phase).await?;
            self.update_plan_with(plan_id, |p| {
                p.current_phase_id = Some(phase.id);
                Ok(())
            })
            .await?;
            info!(phase_id = %phase.id, title = %phase.title, mode = phase.execution_mode.as_str(), "phase running");
            self.publish(
                EventSeverity::Info,
                EventPayload::PhaseStarted {
                    plan_id,
                    phase_id: phase.id,
                    title: phase.title.clone(),
                    mode: phase.execution_mode.as_str().to_string(),
                },
            );

            let tasks = self.repo.list_tasks(phase.id).await?;
            match self.scheduler.run(&phase, tasks, ctx).await {
                Ok(PhaseOutcome::AwaitingApproval { task_id }) => {
                    self.pause(plan_id, PauseReason::ManualApproval { task_id }, Some(task_id))
                        .await?;
                    return Ok(());
                }
                Ok(PhaseOutcome::Completed) => {
                    if self.complete_phase(ctx, &mut phase).await? {
                        return Ok(());
                    }
                }
                Err(err) => {
                    if matches!(
                        err,
                        DomainError::MaxRetriesExceeded { .. } | DomainError::DependencyGraphStuck { .. }
                    ) {
                        phase.fail();
                        self.repo.update_phase(&phase).await?;
                    }
                    return Err(err);
                }
            }
        }

        let plan = self
            .update_plan_with(plan_id, |p| {
                p.current_task_id = None;
                p.transition_to(PlanStatus::Completed)
            })
            .await?;
        info!(completed_tasks = plan.completed_tasks, "plan completed");
        self.publish(
            EventSeverity::Info,
            EventPayload::PlanCompleted {
                plan_id,
                completed_tasks: plan.completed_tasks,
            },
        );
        Ok(())
    }

    /// Mark a phase completed. Returns true when the plan paused after it.
    async fn complete_phase(&self, ctx: &ExecutionContext, phase: &mut Phase) -> DomainResult<bool> {
        let plan_id = ctx.plan_id();
        phase.complete();
        self.repo.update_phase(phase).await?;
        let completed_phases = self.repo.refresh_completed_phases(plan_id).await?;
        info!(phase_id = %phase.id, completed_phases, "phase completed");
        self.publish(
            EventSeverity::Info,
            EventPayload::PhaseCompleted {
                plan_id,
                phase_id: phase.id,
            },
        );

        if !phase.pause_after {
            return Ok(false);
        }
        self.pause(plan_id, PauseReason::PhaseCheckpoint { phase_id: phase.id }, None)
            .await?;
        Ok(true)
    }

    async fn pause(&self, plan_id: Uuid, reason: PauseReason, task_id: Option<Uuid>) -> DomainResult<()> {
        self.update_plan_with(plan_id, |p| {
            if task_id.is_some() {
                p.current_task_id = task_id;
            }
            p.pause(reason)
        })
        .await?;
        info!(reason = %reason.describe(), "plan paused");
        self.publish(
            EventSeverity::Info,
            EventPayload::PlanPaused {
                plan_id,
                reason: reason.describe(),
            },
        );
        Ok(())
    }

    /// Reflect an execution error in the persisted plan.
    async fn record_failure(&self, plan_id: Uuid, err: &DomainError) {
        let outcome = match err {
            DomainError::MaxRetriesExceeded { task_id, .. } => {
                self.pause(plan_id, PauseReason::TaskFailed { task_id: *task_id }, Some(*task_id))
                    .await
            }
            DomainError::DependencyGraphStuck { phase_id, .. } => {
                self.pause(plan_id, PauseReason::DependencyGraphStuck { phase_id: *phase_id }, None)
                    .await
            }
            // Already failed by `cancel_plan`.
            DomainError::Cancelled(_) => Ok(()),
            other => {
                error!(error = %other, "plan execution failed");
                self.publish(
                    EventSeverity::Error,
                    EventPayload::PlanFailed {
                        plan_id,
                        error: other.to_string(),
                    },
                );
                self.update_plan_with(plan_id, |p| p.transition_to(PlanStatus::Failed))
                    .await
                    .map(|_| ())
            }
        };

        if let Err(persist_err) = outcome {
            warn!(error = %persist_err, original = %err, "could not record plan failure");
        }
    }

    /// Re-read the plan, apply `change` and persist it.
    ///
    /// Working on a fresh copy keeps the task pointer written by the runner.
    /// A plan found failed under a live loop was cancelled, either before the
    /// read or between the read and the conditional write.
    async fn update_plan_with<F>(&self, plan_id: Uuid, change: F) -> DomainResult<Plan>
    where
        F: FnOnce(&mut Plan) -> DomainResult<()> + Send,
    {
        let mut plan = self.load_plan(plan_id).await?;
        if plan.status == PlanStatus::Failed {
            return Err(DomainError::Cancelled(plan_id));
        }
        change(&mut plan)?;
        if !self.repo.update_plan_unless_failed(&plan).await? {
            return Err(DomainError::Cancelled(plan_id));
        }
        Ok(plan)
    }

    async fn load_plan(&self, plan_id: Uuid) -> DomainResult<Plan> {
        self.repo
            .get_plan(plan_id)
            .await?
            .ok_or(DomainError::PlanNotFound(plan_id))
    }

    fn register(&self, plan_id: Uuid) -> DomainResult<(RunGuard, watch::Receiver<bool>)> {
        let mut running = lock(&self.running);
        if running.contains_key(&plan_id) {
            return Err(DomainError::PlanAlreadyRunning(plan_id));
        }
        let (tx, rx) = watch::channel(false);
        running.insert(plan_id, tx);
        Ok((
            RunGuard {
                plan_id,
                registry: self.running.clone(),
            },
            rx,
        ))
    }

    fn publish(&self, severity: EventSeverity, payload: EventPayload) {
        self.event_bus.publish(UnifiedEvent::new(severity, payload));
    }
}
