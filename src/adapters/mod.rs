//! Infrastructure adapters for external systems.

pub mod memory;
pub mod sqlite;
pub mod substrates;
pub mod vcs;

pub use memory::InMemoryPlanRepository;
