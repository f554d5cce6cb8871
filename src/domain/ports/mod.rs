//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - PlanRepository: persistence of plans, phases and tasks
//! - Substrate: the external coding agent
//! - VersionControl: working-tree inspection and commits
//!
//! These traits keep the execution engine independent of the concrete
//! database, agent CLI and VCS in use.

pub mod plan_repository;
pub mod substrate;
pub mod version_control;

pub use plan_repository::PlanRepository;
pub use substrate::Substrate;
pub use version_control::VersionControl;
