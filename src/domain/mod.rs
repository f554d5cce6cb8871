//! Domain layer for the Cadence plan execution engine
//!
//! This module contains the plan/phase/task models, the error taxonomy and
//! the ports that external collaborators implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
