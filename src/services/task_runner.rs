//! Single-attempt task execution.
//!
//! One call to [`TaskRunner::run_once`] is one attempt: build the prompt,
//! hand it to the agent, watch for inactivity and cancellation while the
//! agent works, then inspect the working tree and commit whatever changed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutorConfig, Plan, SubstrateRequest, Task};
use crate::domain::ports::{PlanRepository, Substrate, VersionControl};
use crate::services::activity_tracker::ActivityTracker;
use crate::services::event_bus::{EventBus, EventPayload, EventSeverity, UnifiedEvent};
use crate::services::execution_context::ExecutionContext;

const OUTPUT_BUFFER: usize = 256;

/// Result of one successful attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRunOutcome {
    /// Whether the agent left changes in the working tree
    pub changed: bool,
    /// Commit recorded for those changes
    pub commit_id: Option<String>,
    /// Final agent output
    pub output: String,
}

/// Build the agent prompt for the upcoming attempt.
///
/// Retries embed the previous attempt's error verbatim ahead of the original
/// task description.
pub fn build_prompt(task: &Task) -> String {
    match task.last_error.as_deref() {
        Some(error) if task.is_retry() => format!(
            "## Previous Attempt Failed\n\n\
             Attempt {previous} of this task failed with the following error:\n\n\
             ```\n{error}\n```\n\n\
             Fix the problem that caused this failure, then complete the task.\n\n\
             ## Task\n\n{description}",
            previous = task.attempts - 1,
            description = task.description,
        ),
        _ => task.description.clone(),
    }
}

/// Commit message for a task's changes.
pub fn commit_message(task: &Task, plan: &Plan) -> String {
    format!("{}\n\nPlan: {}", task.title, plan.title)
}

/// Runs exactly one attempt of a task.
pub struct TaskRunner<R>
where
    R: PlanRepository + 'static,
{
    repo: Arc<R>,
    substrate: Arc<dyn Substrate>,
    vcs: Arc<dyn VersionControl>,
    tracker: Arc<ActivityTracker>,
    event_bus: Arc<EventBus>,
    config: ExecutorConfig,
    commit_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R> TaskRunner<R>
where
    R: PlanRepository + 'static,
{
    /// Runner invoking `substrate` and committing through `vcs`.
    pub fn new(
        repo: Arc<R>,
        substrate: Arc<dyn Substrate>,
        vcs: Arc<dyn VersionControl>,
        tracker: Arc<ActivityTracker>,
        event_bus: Arc<EventBus>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            repo,
            substrate,
            vcs,
            tracker,
            event_bus,
            config,
            commit_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one attempt of `task`.
    ///
    /// The caller owns the attempt counter; this marks the task running,
    /// persists it and points the plan at it before the agent starts.
    #[instrument(skip_all, fields(task_id = %task.id, attempt = task.attempts))]
    pub async fn run_once(&self, task: &mut Task, ctx: &ExecutionContext) -> DomainResult<TaskRunOutcome> {
        ctx.ensure_not_cancelled()?;

        let correlation_id = Uuid::new_v4();
        task.mark_running();
        self.repo.update_task(task).await?;
        self.repo.set_current_task(ctx.plan_id(), Some(task.id)).await?;

        self.tracker.start_tracking(task.id, correlation_id).await;
        self.publish(
            ctx,
            correlation_id,
            EventSeverity::Info,
            EventPayload::TaskStarted {
                task_id: task.id,
                title: task.title.clone(),
                attempt: task.attempts,
            },
        );

        let result = self.attempt(task, ctx, correlation_id).await;
        self.tracker.stop_tracking(task.id).await;
        result
    }

    async fn attempt(&self, task: &Task, ctx: &ExecutionContext, correlation_id: Uuid) -> DomainResult<TaskRunOutcome> {
        let task_id = task.id;
        let request = SubstrateRequest::new(task_id, build_prompt(task), ctx.working_dir(), self.config.agent_timeout());
        let (output_tx, mut output_rx) = mpsc::channel::<String>(OUTPUT_BUFFER);

        info!(substrate = self.substrate.name(), dir = %ctx.working_dir().display(), "invoking agent");
        let mut agent = self.substrate.execute(request, output_tx);

        let mut poll = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.activity_poll_interval(),
            self.config.activity_poll_interval(),
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.config.agent_timeout());
        tokio::pin!(deadline);
        let mut cancel = ctx.cancel_signal();

        // Returning early drops `agent`, which stops the agent process.
        let output = loop {
            tokio::select! {
                result = &mut agent => break result.map_err(into_agent_error)?,
                Some(chunk) = output_rx.recv() => {
                    self.publish(ctx, correlation_id, EventSeverity::Debug, EventPayload::AgentOutput { task_id, chunk });
                }
                _ = poll.tick() => {
                    if let Some(reason) = self.tracker.check_timeout(task_id).await {
                        warn!(%reason, "task inactive, stopping agent");
                        self.publish(
                            ctx,
                            correlation_id,
                            EventSeverity::Warning,
                            EventPayload::TaskInactive { task_id, reason: reason.clone() },
                        );
                        return Err(DomainError::ActivityTimeout(reason));
                    }
                }
                () = &mut deadline => {
                    return Err(DomainError::AgentInvocation(format!(
                        "Agent timed out after {}s",
                        self.config.agent_timeout_secs
                    )));
                }
                Ok(()) = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("plan cancelled, stopping agent");
                        return Err(DomainError::Cancelled(ctx.plan_id()));
                    }
                }
            }
        };

        while let Ok(chunk) = output_rx.try_recv() {
            self.publish(ctx, correlation_id, EventSeverity::Debug, EventPayload::AgentOutput { task_id, chunk });
        }

        let (changed, commit_id) = self.commit_changes(task, ctx, correlation_id).await?;
        Ok(TaskRunOutcome {
            changed,
            commit_id,
            output: output.output,
        })
    }

    /// Inspect the working tree and commit it, one task per directory at a time.
    async fn commit_changes(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
        correlation_id: Uuid,
    ) -> DomainResult<(bool, Option<String>)> {
        let dir = ctx.working_dir();
        let lock = self.commit_lock(dir);
        let _guard = lock.lock().await;

        let changed = self.vcs.has_changes(dir).await.map_err(into_agent_error)?;
        self.publish(
            ctx,
            correlation_id,
            EventSeverity::Debug,
            EventPayload::DiffCaptured { task_id: task.id, changed },
        );

        if !changed {
            debug!("agent produced no changes");
            return Ok((false, None));
        }

        let commit_id = self
            .vcs
            .commit_all(dir, &commit_message(task, ctx.plan()))
            .await
            .map_err(into_agent_error)?;
        info!(%commit_id, "committed task changes");
        self.publish(
            ctx,
            correlation_id,
            EventSeverity::Info,
            EventPayload::TaskCommitted {
                task_id: task.id,
                commit_id: commit_id.clone(),
            },
        );

        Ok((true, Some(commit_id)))
    }

    fn commit_lock(&self, dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.commit_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(dir.to_path_buf()).or_default().clone()
    }

    fn publish(&self, ctx: &ExecutionContext, correlation_id: Uuid, severity: EventSeverity, payload: EventPayload) {
        self.event_bus.publish(
            UnifiedEvent::new(severity, payload)
                .with_plan(ctx.plan_id())
                .with_correlation(correlation_id),
        );
    }
}

/// Agent, timeout and VCS failures all surface as agent invocation errors.
fn into_agent_error(error: DomainError) -> DomainError {
    match error {
        DomainError::AgentInvocation(_) | DomainError::ActivityTimeout(_) | DomainError::Cancelled(_) => error,
        other => DomainError::AgentInvocation(other.to_string()),
    }
}
