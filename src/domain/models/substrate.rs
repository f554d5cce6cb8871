//! Substrate domain models.
//!
//! A substrate is the external coding agent a task is handed to. The engine
//! only needs "prompt in, text out" plus a stream of output chunks while the
//! agent is working.

use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct SubstrateRequest {
    /// Task this invocation works on
    pub task_id: Uuid,
    /// Full prompt, including any recovery preamble
    pub prompt: String,
    /// Repository working directory the agent runs in
    pub working_dir: PathBuf,
    /// Hard ceiling for the invocation, independent of activity
    pub timeout: Duration,
}

impl SubstrateRequest {
    /// Request for `task_id` running `prompt` inside `working_dir`.
    pub fn new(
        task_id: Uuid,
        prompt: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            task_id,
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            timeout,
        }
    }
}

/// Final result of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstrateOutput {
    /// Text the agent produced
    pub output: String,
    /// Process exit code, when the agent is a process
    pub exit_code: Option<i32>,
}

impl SubstrateOutput {
    /// Successful output with exit code 0.
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: Some(0),
        }
    }
}
