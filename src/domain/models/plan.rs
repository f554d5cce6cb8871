//! Plan domain model.
//!
//! A plan is the top-level unit of work. It owns an ordered list of phases
//! and carries the aggregate progress counters and resume pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Lifecycle status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Generated but never started
    #[default]
    Draft,
    /// An executor is walking the plan
    Running,
    /// Stopped at a checkpoint, approval gate or task failure
    Paused,
    /// Every phase completed
    Completed,
    /// Cancelled or failed with an unrecoverable error
    Failed,
}

impl PlanStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored representation. `complete` is accepted as an alias.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    ///
    /// `Failed` is reachable from every non-terminal state because a cancel is
    /// unconditional. `Running -> Running` covers resuming after a crash left
    /// the persisted status at `running`.
    pub fn valid_transitions(&self) -> Vec<PlanStatus> {
        match self {
            Self::Draft => vec![Self::Running, Self::Failed],
            Self::Running => vec![Self::Running, Self::Paused, Self::Completed, Self::Failed],
            Self::Paused => vec![Self::Running, Self::Failed],
            Self::Completed => vec![],
            Self::Failed => vec![],
        }
    }

    /// Whether `new_status` is listed in [`valid_transitions`](Self::valid_transitions).
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a plan is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseReason {
    /// A phase with `pause_after` finished.
    PhaseCheckpoint {
        /// Phase that just completed.
        phase_id: Uuid,
    },
    /// A manual phase is waiting for an operator to approve this task.
    ManualApproval {
        /// Task awaiting approval.
        task_id: Uuid,
    },
    /// A task exhausted its attempts.
    TaskFailed {
        /// Exhausted task.
        task_id: Uuid,
    },
    /// A parallel phase could not schedule any of its remaining tasks.
    DependencyGraphStuck {
        /// Stalled phase.
        phase_id: Uuid,
    },
}

impl PauseReason {
    /// Human-readable description used in events and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::PhaseCheckpoint { phase_id } => format!("checkpoint after phase {phase_id}"),
            Self::ManualApproval { task_id } => {
                format!("manual approval required for task {task_id}")
            }
            Self::TaskFailed { task_id } => format!("task {task_id} exhausted its attempts"),
            Self::DependencyGraphStuck { phase_id } => {
                format!("phase {phase_id} has an unsatisfiable dependency graph")
            }
        }
    }
}

/// A multi-phase execution plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    /// Unique plan id.
    pub id: Uuid,
    /// Human-readable name, used in commit messages.
    pub title: String,
    /// Repository clone every task of this plan works in
    pub working_dir: PathBuf,
    /// Lifecycle status.
    pub status: PlanStatus,
    /// Phase the loop last entered.
    pub current_phase_id: Option<Uuid>,
    /// Task last started, or the task a pause refers to.
    pub current_task_id: Option<Uuid>,
    /// Set while paused.
    pub pause_reason: Option<PauseReason>,
    /// Completed phase count. Written only by the store.
    pub completed_phases: u32,
    /// Completed task count. Written only by the store.
    pub completed_tasks: u32,
    /// First time the plan ran.
    pub started_at: Option<DateTime<Utc>>,
    /// When the plan completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Draft plan working in `working_dir`.
    pub fn new(title: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            working_dir: working_dir.into(),
            status: PlanStatus::Draft,
            current_phase_id: None,
            current_task_id: None,
            pause_reason: None,
            completed_phases: 0,
            completed_tasks: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same check as [`PlanStatus::can_transition_to`] on the current status.
    pub fn can_transition_to(&self, new_status: PlanStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Move the plan to a new status, maintaining timestamps and pause reason.
    pub fn transition_to(&mut self, new_status: PlanStatus) -> DomainResult<()> {
        if !self.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
                reason: format!("plan {}", self.id),
            });
        }

        let now = Utc::now();
        self.status = new_status;
        self.updated_at = now;

        match new_status {
            PlanStatus::Running => {
                self.started_at.get_or_insert(now);
                self.pause_reason = None;
            }
            PlanStatus::Completed => {
                self.completed_at = Some(now);
                self.pause_reason = None;
            }
            _ => {}
        }

        Ok(())
    }

    /// Pause the plan, recording why.
    pub fn pause(&mut self, reason: PauseReason) -> DomainResult<()> {
        self.transition_to(PlanStatus::Paused)?;
        self.pause_reason = Some(reason);
        Ok(())
    }

    /// The task an operator approved by resuming a manual-approval pause.
    pub fn approved_task(&self) -> Option<Uuid> {
        match self.pause_reason {
            Some(PauseReason::ManualApproval { task_id }) => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_lifecycle() {
        let mut plan = Plan::new("Add auth", "/tmp/repo");
        assert_eq!(plan.status, PlanStatus::Draft);

        plan.transition_to(PlanStatus::Running).unwrap();
        let started = plan.started_at.expect("started_at set on first run");

        plan.pause(PauseReason::PhaseCheckpoint { phase_id: Uuid::new_v4() })
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Paused);
        assert!(plan.pause_reason.is_some());

        plan.transition_to(PlanStatus::Running).unwrap();
        assert_eq!(plan.started_at, Some(started));
        assert!(plan.pause_reason.is_none());

        plan.transition_to(PlanStatus::Completed).unwrap();
        assert!(plan.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut plan = Plan::new("p", ".");
        plan.transition_to(PlanStatus::Failed).unwrap();
        assert!(plan.transition_to(PlanStatus::Running).is_err());
        assert!(PlanStatus::Completed.valid_transitions().is_empty());
    }

    #[test]
    fn test_draft_cannot_pause() {
        let mut plan = Plan::new("p", ".");
        let err = plan
            .pause(PauseReason::TaskFailed { task_id: Uuid::new_v4() })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_approved_task_only_for_manual_pause() {
        let task_id = Uuid::new_v4();
        let mut plan = Plan::new("p", ".");
        plan.transition_to(PlanStatus::Running).unwrap();
        plan.pause(PauseReason::ManualApproval { task_id }).unwrap();
        assert_eq!(plan.approved_task(), Some(task_id));

        plan.pause_reason = Some(PauseReason::TaskFailed { task_id });
        assert_eq!(plan.approved_task(), None);
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            PlanStatus::Draft,
            PlanStatus::Running,
            PlanStatus::Paused,
            PlanStatus::Completed,
            PlanStatus::Failed,
        ] {
            assert_eq!(PlanStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PlanStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_pause_reason_serialization() {
        let reason = PauseReason::ManualApproval { task_id: Uuid::nil() };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"kind\":\"manual_approval\""));
        let back: PauseReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }
}
