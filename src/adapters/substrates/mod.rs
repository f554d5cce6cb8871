//! Substrate adapter implementations.

pub mod claude_code;
pub mod mock;

pub use claude_code::{ClaudeCodeConfig, ClaudeCodeSubstrate};
pub use mock::{MockEvent, MockEventKind, MockInvocation, MockResponse, MockSubstrate};
