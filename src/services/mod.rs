//! Execution services: the engine proper.

pub mod activity_tracker;
pub mod event_bus;
pub mod execution_context;
pub mod phase_scheduler;
pub mod plan_executor;
pub mod retry_policy;
pub mod task_runner;

pub use activity_tracker::{ActivitySnapshot, ActivityTracker};
pub use event_bus::{
    EventBus, EventBusConfig, EventId, EventPayload, EventSeverity, SequenceNumber, UnifiedEvent,
};
pub use execution_context::ExecutionContext;
pub use phase_scheduler::{PhaseOutcome, PhaseScheduler};
pub use plan_executor::PlanExecutor;
pub use retry_policy::RetryPolicy;
pub use task_runner::{build_prompt, commit_message, TaskRunOutcome, TaskRunner};
