//! Infrastructure layer module
//!
//! Ambient concerns shared by the engine and its hosts:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//!
//! Port implementations live in `adapters`.

pub mod config;
pub mod logging;
