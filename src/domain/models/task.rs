//! Task domain model and the attempt cap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on execution attempts for a single task.
pub const MAX_RETRIES: u32 = 3;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has not run in the current round
    #[default]
    Pending,
    /// An attempt is in flight
    Running,
    /// Task completed successfully
    Completed,
    /// Task exhausted its attempts
    Failed,
    /// Task was skipped by an operator; counts as satisfied
    Skipped,
}

impl TaskStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
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
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Completed and skipped tasks satisfy dependents and are never re-run.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The smallest unit of work: one agent invocation plus an optional commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique task id.
    pub id: Uuid,
    /// Owning plan.
    pub plan_id: Uuid,
    /// Owning phase.
    pub phase_id: Uuid,
    /// Position within the phase; `depends_on` refers to these positions
    pub order: u32,
    /// Short name, used as the commit subject.
    pub title: String,
    /// Prompt body handed to the agent
    pub description: String,
    /// Sibling positions that must be settled before this task may start
    pub depends_on: Vec<usize>,
    /// Whether a parallel phase may run this task alongside others.
    pub can_run_in_parallel: bool,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Attempts started so far. Never exceeds [`MAX_RETRIES`].
    pub attempts: u32,
    /// Error of the most recent failed attempt.
    pub last_error: Option<String>,
    /// Commit holding the task's changes, if it changed anything.
    pub commit_id: Option<String>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Pending task at position `order` of its phase.
    pub fn new(
        plan_id: Uuid,
        phase_id: Uuid,
        order: u32,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id,
            phase_id,
            order,
            title: title.into(),
            description: description.into(),
            depends_on: Vec::new(),
            can_run_in_parallel: true,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            commit_id: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the dependency list.
    pub fn with_dependencies(mut self, depends_on: Vec<usize>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Allow or forbid running alongside siblings.
    pub fn with_parallel(mut self, can_run_in_parallel: bool) -> Self {
        self.can_run_in_parallel = can_run_in_parallel;
        self
    }

    /// Whether another attempt is allowed under `max_attempts`.
    pub fn has_attempts_left(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }

    /// Whether the upcoming attempt is a retry of an earlier failure.
    pub fn is_retry(&self) -> bool {
        self.attempts > 1 && self.last_error.is_some()
    }

    /// Start an attempt. The caller owns `attempts`.
    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Settle the task with the commit it produced.
    pub fn mark_completed(&mut self, commit_id: Option<String>) {
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.commit_id = commit_id;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Record the final failure once attempts are exhausted.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Record a failed attempt that will be retried.
    pub fn record_attempt_failure(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Pending;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Operator reset: forget previous attempts so the task can run again.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.attempts = 0;
        self.last_error = None;
        self.commit_id = None;
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
    }
}
