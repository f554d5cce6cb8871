//! SQLite implementation of the PlanRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::PathBuf;
use uuid::Uuid;

use super::{parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExecutionMode, PauseReason, Phase, PhaseStatus, Plan, PlanStatus, Task, TaskStatus,
};
use crate::domain::ports::PlanRepository;

const PLAN_COLUMNS: &str = "id, title, working_dir, status, current_phase_id, current_task_id, pause_reason, \
     completed_phases, completed_tasks, started_at, completed_at, created_at, updated_at";

const PHASE_COLUMNS: &str = "id, plan_id, phase_order, title, execution_mode, pause_after, status, \
     completed_tasks, started_at, completed_at, created_at, updated_at";

const TASK_COLUMNS: &str = "id, plan_id, phase_id, task_order, title, description, depends_on, \
     can_run_in_parallel, status, attempts, last_error, commit_id, started_at, completed_at, created_at, updated_at";

/// Plan store on a migrated SQLite pool.
#[derive(Clone)]
pub struct SqlitePlanRepository {
    pool: SqlitePool,
}

impl SqlitePlanRepository {
    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write every plan column except the counters. `guard` is appended to
    /// the WHERE clause; returns the number of rows changed.
    async fn write_plan(&self, plan: &Plan, guard: &str) -> DomainResult<u64> {
        let pause_reason = plan.pause_reason.map(|r| serde_json::to_string(&r)).transpose()?;

        let result = sqlx::query(&format!(
            "UPDATE plans SET title = ?, working_dir = ?, status = ?, current_phase_id = ?, \
             current_task_id = ?, pause_reason = ?, started_at = ?, completed_at = ?, updated_at = ? \
             WHERE id = ?{guard}"
        ))
        .bind(&plan.title)
        .bind(plan.working_dir.to_string_lossy().into_owned())
        .bind(plan.status.as_str())
        .bind(plan.current_phase_id.map(|id| id.to_string()))
        .bind(plan.current_task_id.map(|id| id.to_string()))
        .bind(pause_reason)
        .bind(plan.started_at.map(|t| t.to_rfc3339()))
        .bind(plan.completed_at.map(|t| t.to_rfc3339()))
        .bind(plan.updated_at.to_rfc3339())
        .bind(plan.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PlanRepository for SqlitePlanRepository {
    async fn create_plan(&self, plan: &Plan) -> DomainResult<()> {
        let pause_reason = plan.pause_reason.map(|r| serde_json::to_string(&r)).transpose()?;

        sqlx::query(&format!(
            "INSERT INTO plans ({PLAN_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(plan.id.to_string())
        .bind(&plan.title)
        .bind(plan.working_dir.to_string_lossy().into_owned())
        .bind(plan.status.as_str())
        .bind(plan.current_phase_id.map(|id| id.to_string()))
        .bind(plan.current_task_id.map(|id| id.to_string()))
        .bind(pause_reason)
        .bind(i64::from(plan.completed_phases))
        .bind(i64::from(plan.completed_tasks))
        .bind(plan.started_at.map(|t| t.to_rfc3339()))
        .bind(plan.completed_at.map(|t| t.to_rfc3339()))
        .bind(plan.created_at.to_rfc3339())
        .bind(plan.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_phase(&self, phase: &Phase) -> DomainResult<()> {
        sqlx::query(&format!(
            "INSERT INTO phases ({PHASE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(phase.id.to_string())
        .bind(phase.plan_id.to_string())
        .bind(i64::from(phase.order))
        .bind(&phase.title)
        .bind(phase.execution_mode.as_str())
        .bind(phase.pause_after)
        .bind(phase.status.as_str())
        .bind(i64::from(phase.completed_tasks))
        .bind(phase.started_at.map(|t| t.to_rfc3339()))
        .bind(phase.completed_at.map(|t| t.to_rfc3339()))
        .bind(phase.created_at.to_rfc3339())
        .bind(phase.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_task(&self, task: &Task) -> DomainResult<()> {
        let depends_on = serde_json::to_string(&task.depends_on)?;

        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(task.id.to_string())
        .bind(task.plan_id.to_string())
        .bind(task.phase_id.to_string())
        .bind(i64::from(task.order))
        .bind(&task.title)
        .bind(&task.description)
        .bind(depends_on)
        .bind(task.can_run_in_parallel)
        .bind(task.status.as_str())
        .bind(i64::from(task.attempts))
        .bind(&task.last_error)
        .bind(&task.commit_id)
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> DomainResult<Option<Plan>> {
        let row: Option<PlanRow> = sqlx::query_as(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_plan(&self, plan: &Plan) -> DomainResult<()> {
        if self.write_plan(plan, "").await? == 0 {
            return Err(DomainError::PlanNotFound(plan.id));
        }
        Ok(())
    }

    async fn update_plan_unless_failed(&self, plan: &Plan) -> DomainResult<bool> {
        if self.write_plan(plan, " AND status != 'failed'").await? > 0 {
            return Ok(true);
        }
        match self.get_plan(plan.id).await? {
            Some(_) => Ok(false),
            None => Err(DomainError::PlanNotFound(plan.id)),
        }
    }

    async fn set_current_task(&self, plan_id: Uuid, task_id: Option<Uuid>) -> DomainResult<()> {
        let result = sqlx::query("UPDATE plans SET current_task_id = ?, updated_at = ? WHERE id = ?")
            .bind(task_id.map(|id| id.to_string()))
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(plan_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::PlanNotFound(plan_id));
        }

        Ok(())
    }

    async fn get_phase(&self, id: Uuid) -> DomainResult<Option<Phase>> {
        let row: Option<PhaseRow> = sqlx::query_as(&format!("SELECT {PHASE_COLUMNS} FROM phases WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_phases(&self, plan_id: Uuid) -> DomainResult<Vec<Phase>> {
        let rows: Vec<PhaseRow> = sqlx::query_as(&format!(
            "SELECT {PHASE_COLUMNS} FROM phases WHERE plan_id = ? ORDER BY phase_order"
        ))
        .bind(plan_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_phase(&self, phase: &Phase) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE phases SET title = ?, execution_mode = ?, pause_after = ?, status = ?,
               started_at = ?, completed_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&phase.title)
        .bind(phase.execution_mode.as_str())
        .bind(phase.pause_after)
        .bind(phase.status.as_str())
        .bind(phase.started_at.map(|t| t.to_rfc3339()))
        .bind(phase.completed_at.map(|t| t.to_rfc3339()))
        .bind(phase.updated_at.to_rfc3339())
        .bind(phase.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::PhaseNotFound(phase.id));
        }

        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_tasks(&self, phase_id: Uuid) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE phase_id = ? ORDER BY task_order"
        ))
        .bind(phase_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_task(&self, task: &Task) -> DomainResult<()> {
        let depends_on = serde_json::to_string(&task.depends_on)?;

        let result = sqlx::query(
            r#"UPDATE tasks SET title = ?, description = ?, depends_on = ?, can_run_in_parallel = ?,
               status = ?, attempts = ?, last_error = ?, commit_id = ?, started_at = ?,
               completed_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(depends_on)
        .bind(task.can_run_in_parallel)
        .bind(task.status.as_str())
        .bind(i64::from(task.attempts))
        .bind(&task.last_error)
        .bind(&task.commit_id)
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.updated_at.to_rfc3339())
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(task.id));
        }

        Ok(())
    }

    async fn increment_completed_tasks(&self, plan_id: Uuid, phase_id: Uuid) -> DomainResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let phase = sqlx::query(
            "UPDATE phases SET completed_tasks = completed_tasks + 1, updated_at = ? WHERE id = ? AND plan_id = ?",
        )
        .bind(&now)
        .bind(phase_id.to_string())
        .bind(plan_id.to_string())
        .execute(&mut *tx)
        .await?;
        if phase.rows_affected() == 0 {
            return Err(DomainError::PhaseNotFound(phase_id));
        }

        let plan = sqlx::query("UPDATE plans SET completed_tasks = completed_tasks + 1, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(plan_id.to_string())
            .execute(&mut *tx)
            .await?;
        if plan.rows_affected() == 0 {
            return Err(DomainError::PlanNotFound(plan_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn refresh_completed_phases(&self, plan_id: Uuid) -> DomainResult<u32> {
        let count: Option<(i64,)> = sqlx::query_as(
            r#"UPDATE plans SET completed_phases = (
                   SELECT COUNT(*) FROM phases WHERE plan_id = plans.id AND status = 'completed'
               ), updated_at = ?
               WHERE id = ?
               RETURNING completed_phases"#,
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(plan_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let (count,) = count.ok_or(DomainError::PlanNotFound(plan_id))?;
        to_u32(count)
    }
}

fn to_u32(value: i64) -> DomainResult<u32> {
    u32::try_from(value).map_err(|e| DomainError::SerializationError(format!("counter {value} out of range: {e}")))
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    title: String,
    working_dir: String,
    status: String,
    current_phase_id: Option<String>,
    current_task_id: Option<String>,
    pause_reason: Option<String>,
    completed_phases: i64,
    completed_tasks: i64,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        let status = PlanStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid plan status: {}", row.status)))?;

        let pause_reason: Option<PauseReason> = row
            .pause_reason
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(Plan {
            id: parse_uuid(&row.id)?,
            title: row.title,
            working_dir: PathBuf::from(row.working_dir),
            status,
            current_phase_id: parse_optional_uuid(row.current_phase_id)?,
            current_task_id: parse_optional_uuid(row.current_task_id)?,
            pause_reason,
            completed_phases: to_u32(row.completed_phases)?,
            completed_tasks: to_u32(row.completed_tasks)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PhaseRow {
    id: String,
    plan_id: String,
    phase_order: i64,
    title: String,
    execution_mode: String,
    pause_after: bool,
    status: String,
    completed_tasks: i64,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PhaseRow> for Phase {
    type Error = DomainError;

    fn try_from(row: PhaseRow) -> Result<Self, Self::Error> {
        let execution_mode = ExecutionMode::from_str(&row.execution_mode).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid execution mode: {}", row.execution_mode))
        })?;
        let status = PhaseStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase status: {}", row.status)))?;

        Ok(Phase {
            id: parse_uuid(&row.id)?,
            plan_id: parse_uuid(&row.plan_id)?,
            order: to_u32(row.phase_order)?,
            title: row.title,
            execution_mode,
            pause_after: row.pause_after,
            status,
            completed_tasks: to_u32(row.completed_tasks)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    plan_id: String,
    phase_id: String,
    task_order: i64,
    title: String,
    description: String,
    depends_on: String,
    can_run_in_parallel: bool,
    status: String,
    attempts: i64,
    last_error: Option<String>,
    commit_id: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid task status: {}", row.status)))?;
        let depends_on: Vec<usize> = serde_json::from_str(&row.depends_on)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(Task {
            id: parse_uuid(&row.id)?,
            plan_id: parse_uuid(&row.plan_id)?,
            phase_id: parse_uuid(&row.phase_id)?,
            order: to_u32(row.task_order)?,
            title: row.title,
            description: row.description,
            depends_on,
            can_run_in_parallel: row.can_run_in_parallel,
            status,
            attempts: to_u32(row.attempts)?,
            last_error: row.last_error,
            commit_id: row.commit_id,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
