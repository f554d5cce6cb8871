//! Persistence port for plans, phases and tasks.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Phase, Plan, Task};

/// Repository port for plan, phase and task persistence.
///
/// Aggregate counters (`completed_tasks`, `completed_phases`) are owned by the
/// store: `update_plan` and `update_phase` never write them, so concurrent
/// task completions cannot be lost to a stale read-modify-write. They change
/// only through `increment_completed_tasks` and `refresh_completed_phases`.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Store a new plan.
    async fn create_plan(&self, plan: &Plan) -> DomainResult<()>;

    /// Store a new phase. Its plan must exist.
    async fn create_phase(&self, phase: &Phase) -> DomainResult<()>;

    /// Store a new task. Its phase must exist.
    async fn create_task(&self, task: &Task) -> DomainResult<()>;

    /// Plan by id, `None` when absent.
    async fn get_plan(&self, id: Uuid) -> DomainResult<Option<Plan>>;

    /// Persist status, pointers, pause reason and timestamps of a plan.
    async fn update_plan(&self, plan: &Plan) -> DomainResult<()>;

    /// Same write as `update_plan`, skipped when the stored plan is already
    /// failed. Returns `false` when the write was skipped.
    ///
    /// The status check and the write happen in one store operation so a
    /// concurrent cancel can never be overwritten.
    async fn update_plan_unless_failed(&self, plan: &Plan) -> DomainResult<bool>;

    /// Point the plan at the task currently executing.
    async fn set_current_task(&self, plan_id: Uuid, task_id: Option<Uuid>) -> DomainResult<()>;

    /// Phase by id, `None` when absent.
    async fn get_phase(&self, id: Uuid) -> DomainResult<Option<Phase>>;

    /// Phases of a plan ordered by `order`.
    async fn list_phases(&self, plan_id: Uuid) -> DomainResult<Vec<Phase>>;

    /// Persist status and timestamps of a phase.
    async fn update_phase(&self, phase: &Phase) -> DomainResult<()>;

    /// Task by id, `None` when absent.
    async fn get_task(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Tasks of a phase ordered by `order`.
    async fn list_tasks(&self, phase_id: Uuid) -> DomainResult<Vec<Task>>;

    /// Persist every mutable task field.
    async fn update_task(&self, task: &Task) -> DomainResult<()>;

    /// Atomically add one completed task to both the phase and the plan.
    async fn increment_completed_tasks(&self, plan_id: Uuid, phase_id: Uuid) -> DomainResult<()>;

    /// Recount completed phases from persisted phase statuses and store it.
    async fn refresh_completed_phases(&self, plan_id: Uuid) -> DomainResult<u32>;
}
