//! Substrate port - interface for the external coding agent.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{SubstrateOutput, SubstrateRequest};

/// Trait for coding agent implementations.
///
/// A substrate takes a prompt and a working directory and edits the
/// repository in place. Implementations must fail with
/// `DomainError::AgentInvocation` on a non-zero exit or when
/// `request.timeout` elapses, and must stop the agent process when the
/// returned future is dropped.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Get the substrate type name.
    fn name(&self) -> &'static str;

    /// Check if the substrate is available and properly configured.
    async fn is_available(&self) -> DomainResult<bool>;

    /// Run the agent to completion.
    ///
    /// Output chunks are sent on `output_tx` as they are produced; send
    /// failures are ignored since nobody may be listening.
    async fn execute(
        &self,
        request: SubstrateRequest,
        output_tx: mpsc::Sender<String>,
    ) -> DomainResult<SubstrateOutput>;
}
