//! Configuration management
//!
//! Layered loading with figment: built-in defaults, then
//! `.cadence/config.yaml`, then `.cadence/local.yaml`, then `CADENCE_*`
//! environment variables.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
