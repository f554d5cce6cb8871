//! Multi-signal inactivity detection for running tasks.
//!
//! A task counts as stuck only when it has been running for at least the
//! minimum runtime *and* nothing has been heard from it for longer than the
//! inactivity threshold. Signals arrive from the event bus (filtered by the
//! attempt's correlation id) or through direct `record_activity` calls.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::models::{ActivityConfig, ActivitySource};
use crate::services::event_bus::EventBus;

/// Read-only view of one tracked task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// Tracked task.
    pub task_id: Uuid,
    /// Attempt whose bus events count as activity.
    pub correlation_id: Uuid,
    /// When tracking started.
    pub started_at: Instant,
    /// Most recent signal.
    pub last_activity_at: Instant,
    /// Kind of the most recent signal.
    pub last_activity_source: ActivitySource,
    /// Cleared when a timeout check finds the task stuck.
    pub is_active: bool,
}

struct TrackedTask {
    snapshot: ActivitySnapshot,
    listener: JoinHandle<()>,
}

type TrackedMap = Arc<RwLock<HashMap<Uuid, TrackedTask>>>;

/// Per-task inactivity monitor.
pub struct ActivityTracker {
    config: ActivityConfig,
    event_bus: Arc<EventBus>,
    tasks: TrackedMap,
}

impl ActivityTracker {
    /// Tracker listening on `event_bus`.
    pub fn new(config: ActivityConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            event_bus,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Begin tracking a task attempt. Restarting an already tracked task
    /// replaces its state and listener.
    pub async fn start_tracking(&self, task_id: Uuid, correlation_id: Uuid) {
        let now = Instant::now();
        // Subscribe before returning so no signal published afterwards is missed.
        let mut receiver = self.event_bus.subscribe();
        let tasks = self.tasks.clone();

        let listener = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let ours = match event.correlation_id {
                            Some(id) => id == correlation_id,
                            None => event.task_id == Some(task_id),
                        };
                        if !ours {
                            continue;
                        }
                        if let Some(source) = event.payload.activity_source() {
                            record(&tasks, task_id, source).await;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Falling behind means the bus is busy; treat it as output.
                        tracing::debug!(%task_id, missed, "activity listener lagged");
                        record(&tasks, task_id, ActivitySource::AgentOutput).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let tracked = TrackedTask {
            snapshot: ActivitySnapshot {
                task_id,
                correlation_id,
                started_at: now,
                last_activity_at: now,
                last_activity_source: ActivitySource::StatusChange,
                is_active: true,
            },
            listener,
        };

        if let Some(previous) = self.tasks.write().await.insert(task_id, tracked) {
            previous.listener.abort();
        }
        tracing::debug!(%task_id, %correlation_id, "started activity tracking");
    }

    /// Record a signal for a task directly.
    pub async fn record_activity(&self, task_id: Uuid, source: ActivitySource) {
        record(&self.tasks, task_id, source).await;
    }

    /// Inactivity reason for a task, or `None` while it is considered alive.
    pub async fn check_timeout(&self, task_id: Uuid) -> Option<String> {
        self.check_timeout_at(task_id, Instant::now()).await
    }

    /// Same as [`check_timeout`](Self::check_timeout) evaluated at `now`.
    pub async fn check_timeout_at(&self, task_id: Uuid, now: Instant) -> Option<String> {
        let mut tasks = self.tasks.write().await;
        let tracked = tasks.get_mut(&task_id)?;
        let snapshot = &mut tracked.snapshot;

        if now.saturating_duration_since(snapshot.started_at) < self.config.min_runtime() {
            return None;
        }

        let inactive = now.saturating_duration_since(snapshot.last_activity_at);
        if inactive < self.config.inactivity_threshold() {
            return None;
        }

        snapshot.is_active = false;
        Some(format!(
            "Task inactive for {}s (threshold {}s); last activity: {}",
            inactive.as_secs(),
            self.config.inactivity_threshold_secs,
            snapshot.last_activity_source
        ))
    }

    /// Stop tracking and drop the task's listener and state.
    pub async fn stop_tracking(&self, task_id: Uuid) {
        if let Some(tracked) = self.tasks.write().await.remove(&task_id) {
            tracked.listener.abort();
            tracing::debug!(%task_id, "stopped activity tracking");
        }
    }

    /// Current state of one tracked task.
    pub async fn snapshot(&self, task_id: Uuid) -> Option<ActivitySnapshot> {
        self.tasks.read().await.get(&task_id).map(|t| t.snapshot.clone())
    }

    /// State of every tracked task, in no particular order.
    pub async fn snapshots(&self) -> Vec<ActivitySnapshot> {
        self.tasks.read().await.values().map(|t| t.snapshot.clone()).collect()
    }

    /// Whether the task is currently tracked.
    pub async fn is_tracking(&self, task_id: Uuid) -> bool {
        self.tasks.read().await.contains_key(&task_id)
    }
}

async fn record(tasks: &TrackedMap, task_id: Uuid, source: ActivitySource) {
    if let Some(tracked) = tasks.write().await.get_mut(&task_id) {
        tracked.snapshot.last_activity_at = Instant::now();
        tracked.snapshot.last_activity_source = source;
        tracked.snapshot.is_active = true;
    }
}
