//! Phase domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the tasks of a phase are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time, in `order`
    #[default]
    Sequential,
    /// Dependency-driven batches, fanned out where allowed
    Parallel,
    /// Each task waits for operator approval
    Manual,
}

impl ExecutionMode {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Manual => "manual",
        }
    }

    /// Parse the stored representation, case-insensitively.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Lifecycle status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Tasks are being scheduled.
    Running,
    /// Every task completed.
    Completed,
    /// A task exhausted its attempts or the dependency graph stalled.
    Failed,
}

impl PhaseStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored representation. `complete` is accepted as an alias.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// An ordered group of tasks within a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    /// Unique phase id.
    pub id: Uuid,
    /// Owning plan.
    pub plan_id: Uuid,
    /// Position of the phase within its plan
    pub order: u32,
    /// Human-readable name.
    pub title: String,
    /// How the phase's tasks are scheduled.
    pub execution_mode: ExecutionMode,
    /// Pause the plan once this phase completes
    pub pause_after: bool,
    /// Lifecycle status.
    pub status: PhaseStatus,
    /// Tasks completed so far. Written only by the store.
    pub completed_tasks: u32,
    /// First time the phase started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the last task completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Phase {
    /// Pending phase at position `order`.
    pub fn new(plan_id: Uuid, order: u32, title: impl Into<String>, mode: ExecutionMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id,
            order,
            title: title.into(),
            execution_mode: mode,
            pause_after: false,
            status: PhaseStatus::Pending,
            completed_tasks: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ask for a checkpoint pause after this phase.
    pub fn with_pause_after(mut self, pause_after: bool) -> Self {
        self.pause_after = pause_after;
        self
    }

    /// Mark the phase as running. `started_at` keeps the first start.
    pub fn start(&mut self) {
        let now = Utc::now();
        self.status = PhaseStatus::Running;
        self.started_at.get_or_insert(now);
        self.updated_at = now;
    }

    /// Mark the phase completed.
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.status = PhaseStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Mark the phase failed. Cleared by the next `start`.
    pub fn fail(&mut self) {
        self.status = PhaseStatus::Failed;
        self.updated_at = Utc::now();
    }
}
