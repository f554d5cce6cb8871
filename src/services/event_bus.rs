//! EventBus service for execution event streaming and distribution.
//!
//! Provides a broadcast-based event system with sequence numbering and
//! correlation tracking. Every task attempt gets its own correlation id, so a
//! subscriber such as the activity tracker can follow one attempt on the
//! shared stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::ActivitySource;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by EventBus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Placeholder carried until the bus assigns the real number.
    pub fn zero() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    /// High-volume detail such as agent output chunks.
    Debug,
    /// Normal lifecycle progress.
    Info,
    /// Retries, inactivity and cancellation.
    Warning,
    /// Exhausted tasks and failed plans.
    Error,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Event payload for every plan, phase and task signal.
///
/// Fields are the ids and values named; `task_id`, `plan_id` and
/// `phase_id` always refer to the entity the variant is about.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// The execution loop picked the plan up.
    PlanStarted { plan_id: Uuid, title: String },
    /// The loop stopped at a checkpoint, approval gate or failure.
    PlanPaused { plan_id: Uuid, reason: String },
    /// Every phase finished.
    PlanCompleted { plan_id: Uuid, completed_tasks: u32 },
    /// A storage or integrity error failed the plan.
    PlanFailed { plan_id: Uuid, error: String },
    /// An operator cancelled the plan.
    PlanCancelled { plan_id: Uuid },
    /// `mode` is the phase's execution mode name.
    PhaseStarted { plan_id: Uuid, phase_id: Uuid, title: String, mode: String },
    PhaseCompleted { plan_id: Uuid, phase_id: Uuid },
    /// No pending task of a parallel phase can ever become ready.
    PhaseStalled { plan_id: Uuid, phase_id: Uuid, pending: Vec<Uuid> },
    /// An attempt began; `attempt` counts from 1.
    TaskStarted { task_id: Uuid, title: String, attempt: u32 },
    TaskRetrying { task_id: Uuid, attempt: u32, max_attempts: u32, previous_error: String },
    /// One chunk of agent stdout.
    AgentOutput { task_id: Uuid, chunk: String },
    /// The working tree was inspected after the agent returned.
    DiffCaptured { task_id: Uuid, changed: bool },
    TaskCommitted { task_id: Uuid, commit_id: String },
    TaskCompleted { task_id: Uuid, commit_id: Option<String> },
    /// The task exhausted its attempts.
    TaskFailed { task_id: Uuid, error: String, attempts: u32 },
    /// The activity tracker stopped a silent agent.
    TaskInactive { task_id: Uuid, reason: String },
    QaGateStarted { task_id: Uuid, gate: String },
    QaGateCompleted { task_id: Uuid, gate: String, passed: bool },
    /// Liveness signal sent by an external observer.
    ActivityPing { task_id: Uuid },
}

impl EventPayload {
    /// The task this payload concerns, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::TaskRetrying { task_id, .. }
            | Self::AgentOutput { task_id, .. }
            | Self::DiffCaptured { task_id, .. }
            | Self::TaskCommitted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskInactive { task_id, .. }
            | Self::QaGateStarted { task_id, .. }
            | Self::QaGateCompleted { task_id, .. }
            | Self::ActivityPing { task_id } => Some(*task_id),
            _ => None,
        }
    }

    /// The plan this payload concerns, if it names one.
    pub fn plan_id(&self) -> Option<Uuid> {
        match self {
            Self::PlanStarted { plan_id, .. }
            | Self::PlanPaused { plan_id, .. }
            | Self::PlanCompleted { plan_id, .. }
            | Self::PlanFailed { plan_id, .. }
            | Self::PlanCancelled { plan_id }
            | Self::PhaseStarted { plan_id, .. }
            | Self::PhaseCompleted { plan_id, .. }
            | Self::PhaseStalled { plan_id, .. } => Some(*plan_id),
            _ => None,
        }
    }

    /// Which activity signal this payload counts as for a running task.
    pub fn activity_source(&self) -> Option<ActivitySource> {
        match self {
            Self::AgentOutput { .. } => Some(ActivitySource::AgentOutput),
            Self::TaskStarted { .. } | Self::TaskCompleted { .. } | Self::TaskFailed { .. } => {
                Some(ActivitySource::StatusChange)
            }
            Self::DiffCaptured { .. } | Self::TaskCommitted { .. } => {
                Some(ActivitySource::DiffCaptured)
            }
            Self::TaskRetrying { .. } => Some(ActivitySource::AgentRetry),
            Self::QaGateStarted { .. } => Some(ActivitySource::QaGateRunning),
            Self::QaGateCompleted { .. } => Some(ActivitySource::QaGateResult),
            Self::ActivityPing { .. } => Some(ActivitySource::ManualPing),
            _ => None,
        }
    }
}

/// Event envelope containing all event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedEvent {
    /// Unique event id.
    pub id: EventId,
    /// Position on the bus, assigned at publish time.
    pub sequence: SequenceNumber,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Severity of the event.
    pub severity: EventSeverity,
    /// Plan the event belongs to, when known.
    pub plan_id: Option<Uuid>,
    /// Task the event concerns, if any.
    pub task_id: Option<Uuid>,
    /// Id of the task attempt that produced the event.
    pub correlation_id: Option<Uuid>,
    /// The signal itself.
    pub payload: EventPayload,
}

impl UnifiedEvent {
    /// Envelope with plan and task ids taken from the payload.
    pub fn new(severity: EventSeverity, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            sequence: SequenceNumber::zero(), // Will be assigned by EventBus
            timestamp: Utc::now(),
            severity,
            plan_id: payload.plan_id(),
            task_id: payload.task_id(),
            correlation_id: None,
            payload,
        }
    }

    /// Attribute the event to a plan.
    pub fn with_plan(mut self, plan_id: Uuid) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    /// Tie the event to one task attempt.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus for broadcasting events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<UnifiedEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event. Fire-and-forget: having no subscribers is fine.
    pub fn publish(&self, mut event: UnifiedEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = SequenceNumber(seq);
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<UnifiedEvent> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_sequence_assignment() {
        let bus = EventBus::default();
        assert_eq!(bus.current_sequence().0, 0);

        let mut rx = bus.subscribe();
        let plan_id = Uuid::new_v4();

        bus.publish(UnifiedEvent::new(
            EventSeverity::Info,
            EventPayload::PlanStarted { plan_id, title: "p".into() },
        ));
        let event1 = rx.recv().await.unwrap();
        assert_eq!(event1.sequence.0, 0);
        assert_eq!(event1.plan_id, Some(plan_id));

        bus.publish(UnifiedEvent::new(
            EventSeverity::Info,
            EventPayload::PlanCancelled { plan_id },
        ));
        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.sequence.0, 1);

        assert_eq!(bus.current_sequence().0, 2);
    }

    #[tokio::test]
    async fn test_correlation_is_carried() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();
        let correlation = Uuid::new_v4();

        bus.publish(
            UnifiedEvent::new(
                EventSeverity::Debug,
                EventPayload::AgentOutput { task_id, chunk: "compiling".into() },
            )
            .with_correlation(correlation),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.correlation_id, Some(correlation));
        assert_eq!(event.task_id, Some(task_id));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(UnifiedEvent::new(
            EventSeverity::Info,
            EventPayload::ActivityPing { task_id: Uuid::new_v4() },
        ));
        assert_eq!(bus.current_sequence().0, 1);
    }

    #[test]
    fn test_activity_source_mapping() {
        let task_id = Uuid::new_v4();
        let cases = [
            (EventPayload::AgentOutput { task_id, chunk: String::new() }, Some(ActivitySource::AgentOutput)),
            (EventPayload::QaGateStarted { task_id, gate: "clippy".into() }, Some(ActivitySource::QaGateRunning)),
            (
                EventPayload::QaGateCompleted { task_id, gate: "clippy".into(), passed: true },
                Some(ActivitySource::QaGateResult),
            ),
            (EventPayload::DiffCaptured { task_id, changed: true }, Some(ActivitySource::DiffCaptured)),
            (EventPayload::ActivityPing { task_id }, Some(ActivitySource::ManualPing)),
            (EventPayload::TaskInactive { task_id, reason: String::new() }, None),
            (EventPayload::PlanCancelled { plan_id: Uuid::new_v4() }, None),
        ];
        for (payload, expected) in cases {
            assert_eq!(payload.activity_source(), expected, "{payload:?}");
        }
    }

    #[test]
    fn test_payload_serialization_tag() {
        let payload = EventPayload::TaskCommitted {
            task_id: Uuid::nil(),
            commit_id: "abc123".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "task_committed");
        assert_eq!(json["commit_id"], "abc123");
    }
}
