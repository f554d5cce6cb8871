//! Per-run execution context shared by the scheduler, retry loop and runner.

use std::path::Path;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Plan;

/// What one execution loop knows about the plan it is driving.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    plan: Plan,
    cancel: watch::Receiver<bool>,
    approved_task: Option<Uuid>,
}

impl ExecutionContext {
    /// Context for `plan`, stopped when `cancel` turns true.
    pub fn new(plan: Plan, cancel: watch::Receiver<bool>) -> Self {
        Self {
            plan,
            cancel,
            approved_task: None,
        }
    }

    /// A context that can never be cancelled.
    pub fn detached(plan: Plan) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(plan, rx)
    }

    /// Let a manual phase run this task once without pausing first.
    pub fn with_approved_task(mut self, task_id: Option<Uuid>) -> Self {
        self.approved_task = task_id;
        self
    }

    /// Plan snapshot taken when the loop started.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Id of the plan being driven.
    pub fn plan_id(&self) -> Uuid {
        self.plan.id
    }

    /// Directory every task of the plan runs in.
    pub fn working_dir(&self) -> &Path {
        &self.plan.working_dir
    }

    /// Task a resume approved, if any.
    pub fn approved_task(&self) -> Option<Uuid> {
        self.approved_task
    }

    /// Whether a cancel has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// `Err(Cancelled)` once a cancel has been signalled.
    pub fn ensure_not_cancelled(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::Cancelled(self.plan.id));
        }
        Ok(())
    }

    /// A fresh receiver for `select!`-ing on cancellation.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }
}
