//! Mock substrate for testing.
//!
//! Responses are scripted per task and consumed in order; once a task's
//! script runs out the default response is used. Every invocation is logged
//! with start/finish markers so tests can assert on ordering and overlap.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{SubstrateOutput, SubstrateRequest};
use crate::domain::ports::Substrate;

/// Mock response configuration.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Output text
    pub output: String,
    /// Whether to simulate failure
    pub fail: bool,
    /// Error message if failing
    pub error_message: Option<String>,
    /// How long the agent "works" after emitting its chunks
    pub delay: Duration,
    /// Output chunks streamed before finishing
    pub chunks: Vec<String>,
    /// Pause between chunks
    pub chunk_interval: Duration,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            output: "Mock task completed successfully.".to_string(),
            fail: false,
            error_message: None,
            delay: Duration::ZERO,
            chunks: vec![],
            chunk_interval: Duration::ZERO,
        }
    }
}

impl MockResponse {
    /// Succeed with `output`.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    /// Fail with `error` as the agent's message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    /// An agent that goes silent and never returns on its own.
    pub fn hang() -> Self {
        Self::default().with_delay(Duration::from_secs(24 * 60 * 60))
    }

    /// Work for `delay` before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Stream `chunks`, one every `interval`, before the delay starts.
    pub fn with_chunks(mut self, chunks: Vec<String>, interval: Duration) -> Self {
        self.chunks = chunks;
        self.chunk_interval = interval;
        self
    }
}

/// One recorded call to `execute`.
#[derive(Debug, Clone)]
pub struct MockInvocation {
    /// Task the call was for.
    pub task_id: Uuid,
    /// Prompt the agent received.
    pub prompt: String,
    /// Directory the agent ran in.
    pub working_dir: PathBuf,
}

/// Kind of timeline marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEventKind {
    /// The call began.
    Started,
    /// The call returned on its own.
    Finished,
    /// The call was dropped before it returned.
    Aborted,
}

/// Start/finish marker in the invocation timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockEvent {
    /// Task the call was for.
    pub task_id: Uuid,
    /// What happened.
    pub kind: MockEventKind,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<Uuid, VecDeque<MockResponse>>,
    invocations: Vec<MockInvocation>,
    timeline: Vec<MockEvent>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks an invocation aborted unless it reached the end.
struct InFlight {
    state: Arc<Mutex<MockState>>,
    task_id: Uuid,
    done: bool,
}

impl InFlight {
    fn finish(mut self) {
        self.done = true;
        lock(&self.state).timeline.push(MockEvent {
            task_id: self.task_id,
            kind: MockEventKind::Finished,
        });
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.done {
            lock(&self.state).timeline.push(MockEvent {
                task_id: self.task_id,
                kind: MockEventKind::Aborted,
            });
        }
    }
}

/// Mock substrate for testing.
pub struct MockSubstrate {
    state: Arc<Mutex<MockState>>,
    default_response: MockResponse,
}

impl MockSubstrate {
    /// Substrate whose default response succeeds.
    pub fn new() -> Self {
        Self::with_default_response(MockResponse::default())
    }

    /// Substrate answering unscripted calls with `response`.
    pub fn with_default_response(response: MockResponse) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            default_response: response,
        }
    }

    /// Queue responses for a task, consumed one per invocation.
    pub fn script(&self, task_id: Uuid, responses: impl IntoIterator<Item = MockResponse>) {
        lock(&self.state).scripts.entry(task_id).or_default().extend(responses);
    }

    /// Every call so far, in start order.
    pub fn invocations(&self) -> Vec<MockInvocation> {
        lock(&self.state).invocations.clone()
    }

    /// Calls made for one task.
    pub fn invocations_for(&self, task_id: Uuid) -> Vec<MockInvocation> {
        lock(&self.state)
            .invocations
            .iter()
            .filter(|i| i.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Start, finish and abort markers in the order they happened.
    pub fn timeline(&self) -> Vec<MockEvent> {
        lock(&self.state).timeline.clone()
    }

    /// Highest number of invocations that were in flight at the same time.
    pub fn max_concurrency(&self) -> usize {
        let mut current = 0usize;
        let mut max = 0usize;
        for event in lock(&self.state).timeline.iter() {
            match event.kind {
                MockEventKind::Started => {
                    current += 1;
                    max = max.max(current);
                }
                MockEventKind::Finished | MockEventKind::Aborted => current = current.saturating_sub(1),
            }
        }
        max
    }

    fn next_response(&self, request: &SubstrateRequest) -> MockResponse {
        let mut state = lock(&self.state);
        state.invocations.push(MockInvocation {
            task_id: request.task_id,
            prompt: request.prompt.clone(),
            working_dir: request.working_dir.clone(),
        });
        state.timeline.push(MockEvent {
            task_id: request.task_id,
            kind: MockEventKind::Started,
        });
        state
            .scripts
            .get_mut(&request.task_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Substrate for MockSubstrate {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn is_available(&self) -> DomainResult<bool> {
        Ok(true)
    }

    async fn execute(
        &self,
        request: SubstrateRequest,
        output_tx: mpsc::Sender<String>,
    ) -> DomainResult<SubstrateOutput> {
        let response = self.next_response(&request);
        let in_flight = InFlight {
            state: self.state.clone(),
            task_id: request.task_id,
            done: false,
        };

        let work = async {
            for chunk in &response.chunks {
                let _ = output_tx.send(chunk.clone()).await;
                tokio::time::sleep(response.chunk_interval).await;
            }
            if response.delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(response.delay).await;
            }
        };

        if tokio::time::timeout(request.timeout, work).await.is_err() {
            in_flight.finish();
            return Err(DomainError::AgentInvocation(format!(
                "Agent timed out after {}s",
                request.timeout.as_secs()
            )));
        }
        in_flight.finish();

        if response.fail {
            return Err(DomainError::AgentInvocation(
                response.error_message.unwrap_or_else(|| "Mock failure".to_string()),
            ));
        }

        Ok(SubstrateOutput::new(response.output))
    }
}
