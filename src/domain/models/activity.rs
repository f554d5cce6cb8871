//! Activity signals used to decide whether a running task is stuck.

use serde::{Deserialize, Serialize};

/// The kind of signal that last proved a task was alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivitySource {
    /// The agent wrote to stdout.
    AgentOutput,
    /// The attempt started or settled.
    StatusChange,
    /// A quality gate began.
    QaGateRunning,
    /// A quality gate reported.
    QaGateResult,
    /// The working tree was inspected or committed.
    DiffCaptured,
    /// A new attempt was scheduled.
    AgentRetry,
    /// Someone called `record_activity` directly.
    ManualPing,
}

impl ActivitySource {
    /// Kebab-case name used in logs and timeout reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentOutput => "agent-output",
            Self::StatusChange => "status-change",
            Self::QaGateRunning => "qa-gate-running",
            Self::QaGateResult => "qa-gate-result",
            Self::DiffCaptured => "diff-captured",
            Self::AgentRetry => "agent-retry",
            Self::ManualPing => "manual-ping",
        }
    }
}

impl std::fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
