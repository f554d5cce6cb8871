//! Domain models for plans, phases, tasks and their execution.

pub mod activity;
pub mod config;
pub mod phase;
pub mod phase_graph;
pub mod plan;
pub mod substrate;
pub mod task;

pub use activity::ActivitySource;
pub use config::{
    ActivityConfig, AgentConfig, Config, DatabaseConfig, ExecutorConfig, LogFormat,
    LoggingConfig, RotationPolicy,
};
pub use phase::{ExecutionMode, Phase, PhaseStatus};
pub use phase_graph::{GraphDiagnostics, PhaseGraph};
pub use plan::{PauseReason, Plan, PlanStatus};
pub use substrate::{SubstrateOutput, SubstrateRequest};
pub use task::{Task, TaskStatus, MAX_RETRIES};
