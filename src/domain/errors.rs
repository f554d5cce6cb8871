//! Domain errors for the Cadence plan execution engine.

use thiserror::Error;
use uuid::Uuid;

/// Format a list of task ids as a comma separated string.
fn format_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Domain-level errors that can occur while executing a plan.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No plan with this id is stored.
    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    /// No phase with this id is stored.
    #[error("Phase not found: {0}")]
    PhaseNotFound(Uuid),

    /// No task with this id is stored.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// One attempt failed: the agent errored, timed out or its changes could not be committed.
    #[error("Agent invocation failed: {0}")]
    AgentInvocation(String),

    /// The activity tracker stopped a silent agent.
    #[error("Activity timeout: {0}")]
    ActivityTimeout(String),

    /// A task used up its attempts.
    #[error("Task {task_id} failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Exhausted task.
        task_id: Uuid,
        /// Attempts spent, never more than the cap.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },

    /// No pending task of a parallel phase can become ready.
    #[error("Phase {phase_id} cannot make progress; pending tasks: {}", format_ids(.pending))]
    DependencyGraphStuck {
        /// Stalled phase.
        phase_id: Uuid,
        /// Tasks left unsettled.
        pending: Vec<Uuid>,
    },

    /// An execution loop for the plan is already live in this process.
    #[error("Plan {0} is already being executed")]
    PlanAlreadyRunning(Uuid),

    /// The plan was cancelled while running.
    #[error("Plan {0} was cancelled")]
    Cancelled(Uuid),

    /// A status change the lifecycle does not allow.
    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
        /// What was being changed.
        reason: String,
    },

    /// Inspecting or committing the working tree failed.
    #[error("Version control error: {0}")]
    Vcs(String),

    /// Input rejected before any work started.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The plan store failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result alias used across the domain and services.
pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether this failure consumes a task attempt and may be retried.
    ///
    /// Agent failures, inactivity timeouts and VCS failures during the
    /// inspect/commit step are attempt-level failures. Everything else
    /// (storage, integrity, cancellation) aborts the attempt loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AgentInvocation(_) | Self::ActivityTimeout(_) | Self::Vcs(_)
        )
    }

    /// Whether this error indicates a missing plan, phase or task record.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::PlanNotFound(_) | Self::PhaseNotFound(_) | Self::TaskNotFound(_)
        )
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
