//! Phase scheduling: decides the order in which a phase's tasks run.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionMode, Phase, PhaseGraph, Task};
use crate::domain::ports::PlanRepository;
use crate::services::event_bus::{EventBus, EventPayload, EventSeverity, UnifiedEvent};
use crate::services::execution_context::ExecutionContext;
use crate::services::retry_policy::RetryPolicy;

/// How a phase run ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Every task is completed or skipped.
    Completed,
    /// A manual phase is waiting for an operator to approve this task.
    AwaitingApproval {
        /// First unsettled task of the phase.
        task_id: Uuid,
    },
}

/// Runs one phase's tasks in its execution mode, through the retry policy.
pub struct PhaseScheduler<R>
where
    R: PlanRepository + 'static,
{
    retry: RetryPolicy<R>,
    event_bus: Arc<EventBus>,
    max_concurrency: usize,
}

impl<R> PhaseScheduler<R>
where
    R: PlanRepository + 'static,
{
    /// `max_concurrency` caps parallel fan-out and is raised to at least 1.
    pub fn new(retry: RetryPolicy<R>, event_bus: Arc<EventBus>, max_concurrency: usize) -> Self {
        Self {
            retry,
            event_bus,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run the unsettled tasks of `phase`. `tasks` must be the phase's tasks.
    #[instrument(skip_all, fields(phase_id = %phase.id, mode = phase.execution_mode.as_str()))]
    pub async fn run(&self, phase: &Phase, tasks: Vec<Task>, ctx: &ExecutionContext) -> DomainResult<PhaseOutcome> {
        debug!(
            tasks = tasks.len(),
            max_attempts = self.retry.max_attempts(),
            max_concurrency = self.max_concurrency,
            "scheduling phase"
        );
        match phase.execution_mode {
            ExecutionMode::Sequential => self.run_sequential(tasks, ctx).await,
            ExecutionMode::Parallel => self.run_parallel(phase, tasks, ctx).await,
            ExecutionMode::Manual => self.run_manual(tasks, ctx).await,
        }
    }

    async fn run_sequential(&self, mut tasks: Vec<Task>, ctx: &ExecutionContext) -> DomainResult<PhaseOutcome> {
        tasks.sort_by_key(|t| t.order);
        for mut task in tasks.into_iter().filter(|t| !t.status.is_settled()) {
            ctx.ensure_not_cancelled()?;
            self.retry.execute(&mut task, ctx).await?;
        }
        Ok(PhaseOutcome::Completed)
    }

    async fn run_parallel(&self, phase: &Phase, tasks: Vec<Task>, ctx: &ExecutionContext) -> DomainResult<PhaseOutcome> {
        let graph = PhaseGraph::new(tasks);
        let diagnostics = graph.diagnose();
        if !diagnostics.is_clean() {
            warn!(?diagnostics, "phase dependency graph is malformed");
        }

        let mut completed: HashSet<usize> = graph.settled();
        loop {
            if completed.len() == graph.len() {
                return Ok(PhaseOutcome::Completed);
            }

            let ready = graph.ready(&completed);
            if ready.is_empty() {
                let pending = graph.pending_ids(&completed);
                warn!(pending = pending.len(), "no task can be scheduled, halting phase");
                self.event_bus.publish(
                    UnifiedEvent::new(
                        EventSeverity::Error,
                        EventPayload::PhaseStalled {
                            plan_id: ctx.plan_id(),
                            phase_id: phase.id,
                            pending: pending.clone(),
                        },
                    )
                    .with_plan(ctx.plan_id()),
                );
                return Err(DomainError::DependencyGraphStuck {
                    phase_id: phase.id,
                    pending,
                });
            }

            ctx.ensure_not_cancelled()?;
            let (concurrent, serial): (Vec<usize>, Vec<usize>) =
                ready.into_iter().partition(|&idx| graph.task(idx).can_run_in_parallel);
            debug!(concurrent = concurrent.len(), serial = serial.len(), "scheduling batch");

            let semaphore = Semaphore::new(self.max_concurrency);
            let runs = concurrent.iter().map(|&idx| {
                let mut task = graph.task(idx).clone();
                let semaphore = &semaphore;
                async move {
                    let result = match semaphore.acquire().await {
                        Ok(_permit) => self.retry.execute(&mut task, ctx).await.map(|_| ()),
                        Err(_) => Err(DomainError::ValidationFailed("Semaphore closed".to_string())),
                    };
                    (idx, result)
                }
            });

            let mut first_error = None;
            for (idx, result) in join_all(runs).await {
                match result {
                    Ok(()) => {
                        completed.insert(idx);
                    }
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }

            for idx in serial {
                ctx.ensure_not_cancelled()?;
                let mut task = graph.task(idx).clone();
                self.retry.execute(&mut task, ctx).await?;
                completed.insert(idx);
            }
        }
    }

    async fn run_manual(&self, mut tasks: Vec<Task>, ctx: &ExecutionContext) -> DomainResult<PhaseOutcome> {
        tasks.sort_by_key(|t| t.order);
        let mut pending = tasks.into_iter().filter(|t| !t.status.is_settled());

        let Some(mut task) = pending.next() else {
            return Ok(PhaseOutcome::Completed);
        };

        if ctx.approved_task() != Some(task.id) {
            info!(task_id = %task.id, "manual phase waiting for approval");
            return Ok(PhaseOutcome::AwaitingApproval { task_id: task.id });
        }

        ctx.ensure_not_cancelled()?;
        self.retry.execute(&mut task, ctx).await?;

        Ok(pending
            .next()
            .map_or(PhaseOutcome::Completed, |next| PhaseOutcome::AwaitingApproval { task_id: next.id }))
    }
}
