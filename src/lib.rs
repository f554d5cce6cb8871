//! Cadence - Plan Execution Engine
//!
//! Cadence drives multi-phase implementation plans through an external AI
//! coding agent. Each task is handed to the agent, its changes are committed
//! to version control, and failures are retried with the previous error in
//! the prompt. Stalled agents are detected from their output activity.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Plans, phases, tasks and the port traits
//! - **Service Layer** (`services`): Task runner, retry policy, phase
//!   scheduler, activity tracker and the plan executor
//! - **Adapters** (`adapters`): SQLite and in-memory repositories, the
//!   Claude CLI substrate, git
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cadence::adapters::sqlite::{initialize_database, SqlitePlanRepository};
//! use cadence::adapters::substrates::ClaudeCodeSubstrate;
//! use cadence::adapters::vcs::GitVcs;
//! use cadence::{ConfigLoader, EventBus, PlanExecutor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let pool = initialize_database(&config.database).await?;
//!     let executor = PlanExecutor::new(
//!         Arc::new(SqlitePlanRepository::new(pool)),
//!         Arc::new(ClaudeCodeSubstrate::new((&config.agent).into())),
//!         Arc::new(GitVcs::new()),
//!         Arc::new(EventBus::default()),
//!         &config,
//!     );
//!     let plan = executor.execute_plan(plan_id).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, ExecutionMode, PauseReason, Phase, PhaseStatus, Plan, PlanStatus, Task, TaskStatus,
    MAX_RETRIES,
};
pub use domain::ports::{PlanRepository, Substrate, VersionControl};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::LoggerImpl;
pub use services::{
    ActivityTracker, EventBus, EventPayload, PhaseScheduler, PlanExecutor, RetryPolicy, TaskRunner,
    UnifiedEvent,
};
