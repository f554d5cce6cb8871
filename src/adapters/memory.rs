//! In-memory PlanRepository for tests and embedding.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Phase, PhaseStatus, Plan, PlanStatus, Task};
use crate::domain::ports::PlanRepository;

#[derive(Default)]
struct Store {
    plans: HashMap<Uuid, Plan>,
    phases: HashMap<Uuid, Phase>,
    tasks: HashMap<Uuid, Task>,
}

/// Plan store backed by hash maps behind a single lock.
#[derive(Default)]
pub struct InMemoryPlanRepository {
    store: RwLock<Store>,
}

impl InMemoryPlanRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn create_plan(&self, plan: &Plan) -> DomainResult<()> {
        self.store.write().await.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn create_phase(&self, phase: &Phase) -> DomainResult<()> {
        let mut store = self.store.write().await;
        if !store.plans.contains_key(&phase.plan_id) {
            return Err(DomainError::PlanNotFound(phase.plan_id));
        }
        store.phases.insert(phase.id, phase.clone());
        Ok(())
    }

    async fn create_task(&self, task: &Task) -> DomainResult<()> {
        let mut store = self.store.write().await;
        if !store.phases.contains_key(&task.phase_id) {
            return Err(DomainError::PhaseNotFound(task.phase_id));
        }
        store.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> DomainResult<Option<Plan>> {
        Ok(self.store.read().await.plans.get(&id).cloned())
    }

    async fn update_plan(&self, plan: &Plan) -> DomainResult<()> {
        let mut store = self.store.write().await;
        let stored = store.plans.get_mut(&plan.id).ok_or(DomainError::PlanNotFound(plan.id))?;
        let (completed_phases, completed_tasks) = (stored.completed_phases, stored.completed_tasks);
        *stored = plan.clone();
        stored.completed_phases = completed_phases;
        stored.completed_tasks = completed_tasks;
        Ok(())
    }

    async fn update_plan_unless_failed(&self, plan: &Plan) -> DomainResult<bool> {
        let mut store = self.store.write().await;
        let stored = store.plans.get_mut(&plan.id).ok_or(DomainError::PlanNotFound(plan.id))?;
        if stored.status == PlanStatus::Failed {
            return Ok(false);
        }
        let (completed_phases, completed_tasks) = (stored.completed_phases, stored.completed_tasks);
        *stored = plan.clone();
        stored.completed_phases = completed_phases;
        stored.completed_tasks = completed_tasks;
        Ok(true)
    }

    async fn set_current_task(&self, plan_id: Uuid, task_id: Option<Uuid>) -> DomainResult<()> {
        let mut store = self.store.write().await;
        let plan = store.plans.get_mut(&plan_id).ok_or(DomainError::PlanNotFound(plan_id))?;
        plan.current_task_id = task_id;
        plan.updated_at = Utc::now();
        Ok(())
    }

    async fn get_phase(&self, id: Uuid) -> DomainResult<Option<Phase>> {
        Ok(self.store.read().await.phases.get(&id).cloned())
    }

    async fn list_phases(&self, plan_id: Uuid) -> DomainResult<Vec<Phase>> {
        let store = self.store.read().await;
        let mut phases: Vec<Phase> = store.phases.values().filter(|p| p.plan_id == plan_id).cloned().collect();
        phases.sort_by_key(|p| p.order);
        Ok(phases)
    }

    async fn update_phase(&self, phase: &Phase) -> DomainResult<()> {
        let mut store = self.store.write().await;
        let stored = store.phases.get_mut(&phase.id).ok_or(DomainError::PhaseNotFound(phase.id))?;
        let completed_tasks = stored.completed_tasks;
        *stored = phase.clone();
        stored.completed_tasks = completed_tasks;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> DomainResult<Option<Task>> {
        Ok(self.store.read().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, phase_id: Uuid) -> DomainResult<Vec<Task>> {
        let store = self.store.read().await;
        let mut tasks: Vec<Task> = store.tasks.values().filter(|t| t.phase_id == phase_id).cloned().collect();
        tasks.sort_by_key(|t| t.order);
        Ok(tasks)
    }

    async fn update_task(&self, task: &Task) -> DomainResult<()> {
        let mut store = self.store.write().await;
        let stored = store.tasks.get_mut(&task.id).ok_or(DomainError::TaskNotFound(task.id))?;
        *stored = task.clone();
        Ok(())
    }

    async fn increment_completed_tasks(&self, plan_id: Uuid, phase_id: Uuid) -> DomainResult<()> {
        let mut store = self.store.write().await;
        if !store.plans.contains_key(&plan_id) {
            return Err(DomainError::PlanNotFound(plan_id));
        }
        let now = Utc::now();
        let phase = store.phases.get_mut(&phase_id).ok_or(DomainError::PhaseNotFound(phase_id))?;
        phase.completed_tasks += 1;
        phase.updated_at = now;
        if let Some(plan) = store.plans.get_mut(&plan_id) {
            plan.completed_tasks += 1;
            plan.updated_at = now;
        }
        Ok(())
    }

    async fn refresh_completed_phases(&self, plan_id: Uuid) -> DomainResult<u32> {
        let mut store = self.store.write().await;
        let count = store
            .phases
            .values()
            .filter(|p| p.plan_id == plan_id && p.status == PhaseStatus::Completed)
            .count();
        let count = u32::try_from(count).map_err(|e| DomainError::SerializationError(e.to_string()))?;
        let plan = store.plans.get_mut(&plan_id).ok_or(DomainError::PlanNotFound(plan_id))?;
        plan.completed_phases = count;
        plan.updated_at = Utc::now();
        Ok(count)
    }
}
