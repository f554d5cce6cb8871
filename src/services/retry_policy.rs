//! Bounded-attempt retry around [`TaskRunner`].

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskStatus, MAX_RETRIES};
use crate::domain::ports::PlanRepository;
use crate::services::event_bus::{EventBus, EventPayload, EventSeverity, UnifiedEvent};
use crate::services::execution_context::ExecutionContext;
use crate::services::task_runner::{TaskRunOutcome, TaskRunner};

/// Runs a task until it succeeds or exhausts its attempts.
///
/// The attempt counter is the persisted `task.attempts`, so a task resumed
/// after a pause or crash continues where it left off and never goes past
/// the cap. There is no backoff between attempts: the next attempt gets the
/// previous error in its prompt instead.
pub struct RetryPolicy<R>
where
    R: PlanRepository + 'static,
{
    repo: Arc<R>,
    runner: TaskRunner<R>,
    event_bus: Arc<EventBus>,
    max_attempts: u32,
}

impl<R> RetryPolicy<R>
where
    R: PlanRepository + 'static,
{
    /// `max_attempts` is clamped to `1..=MAX_RETRIES`.
    pub fn new(repo: Arc<R>, runner: TaskRunner<R>, event_bus: Arc<EventBus>, max_attempts: u32) -> Self {
        Self {
            repo,
            runner,
            event_bus,
            max_attempts: max_attempts.clamp(1, MAX_RETRIES),
        }
    }

    /// Effective attempt cap after clamping.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `task` until it completes. Exhaustion leaves it `failed` and
    /// returns `MaxRetriesExceeded`; cancellation returns it to `pending`.
    #[instrument(skip_all, fields(task_id = %task.id, title = %task.title))]
    pub async fn execute(&self, task: &mut Task, ctx: &ExecutionContext) -> DomainResult<TaskRunOutcome> {
        loop {
            ctx.ensure_not_cancelled()?;

            if task.attempts >= self.max_attempts {
                return Err(self.exhaust(task, ctx).await?);
            }

            task.attempts += 1;
            self.repo.update_task(task).await?;

            if task.attempts > 1 {
                self.publish(
                    ctx,
                    EventSeverity::Warning,
                    EventPayload::TaskRetrying {
                        task_id: task.id,
                        attempt: task.attempts,
                        max_attempts: self.max_attempts,
                        previous_error: task.last_error.clone().unwrap_or_default(),
                    },
                );
            }

            match self.runner.run_once(task, ctx).await {
                Ok(outcome) => {
                    task.mark_completed(outcome.commit_id.clone());
                    self.repo.update_task(task).await?;
                    self.repo.increment_completed_tasks(task.plan_id, task.phase_id).await?;
                    info!(attempt = task.attempts, changed = outcome.changed, "task completed");
                    self.publish(
                        ctx,
                        EventSeverity::Info,
                        EventPayload::TaskCompleted {
                            task_id: task.id,
                            commit_id: outcome.commit_id.clone(),
                        },
                    );
                    return Ok(outcome);
                }
                Err(err) if err.is_retryable() => {
                    let message = attempt_error_text(&err);
                    warn!(attempt = task.attempts, error = %message, "task attempt failed");
                    task.record_attempt_failure(message);
                    if task.attempts >= self.max_attempts {
                        return Err(self.exhaust(task, ctx).await?);
                    }
                    self.repo.update_task(task).await?;
                }
                Err(err) => {
                    // Not the task's fault: hand the attempt back untouched.
                    task.status = TaskStatus::Pending;
                    task.updated_at = chrono::Utc::now();
                    if let Err(persist_err) = self.repo.update_task(task).await {
                        warn!(error = %persist_err, "failed to reset interrupted task");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Mark the task failed and build the error that pauses the plan.
    async fn exhaust(&self, task: &mut Task, ctx: &ExecutionContext) -> DomainResult<DomainError> {
        let last_error = task
            .last_error
            .clone()
            .unwrap_or_else(|| "attempt interrupted before completion".to_string());

        if task.status != TaskStatus::Failed {
            task.mark_failed(format!(
                "{last_error}\n\nMax retries exceeded ({} attempts)",
                task.attempts
            ));
            self.repo.update_task(task).await?;
        }

        warn!(attempts = task.attempts, "task exhausted its attempts");
        self.publish(
            ctx,
            EventSeverity::Error,
            EventPayload::TaskFailed {
                task_id: task.id,
                error: last_error.clone(),
                attempts: task.attempts,
            },
        );

        Ok(DomainError::MaxRetriesExceeded {
            task_id: task.id,
            attempts: task.attempts,
            last_error,
        })
    }

    fn publish(&self, ctx: &ExecutionContext, severity: EventSeverity, payload: EventPayload) {
        self.event_bus
            .publish(UnifiedEvent::new(severity, payload).with_plan(ctx.plan_id()));
    }
}

/// The bare failure text, without the error-kind prefix.
fn attempt_error_text(error: &DomainError) -> String {
    match error {
        DomainError::AgentInvocation(msg) | DomainError::ActivityTimeout(msg) | DomainError::Vcs(msg) => msg.clone(),
        other => other.to_string(),
    }
}
