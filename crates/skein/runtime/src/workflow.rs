//! The contract between a workflow type and the runtime

use async_trait::async_trait;
use skein_types::{SelfUpdate, SkeinResult, WorkflowInstance, WorkflowKind};

pub type InputOf<W> = <<W as Workflow>::Kind as WorkflowKind>::Input;
pub type WorkOf<W> = <<W as Workflow>::Kind as WorkflowKind>::Work;
pub type SubStageOf<W> = <<W as Workflow>::Kind as WorkflowKind>::SubStage;

/// A workflow type driven by the runtime
///
/// The runtime owns persistence and scheduling. A workflow only computes
/// the next update from the persisted `(stage, sub_stage, work)` tuple;
/// it never writes the instance itself.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Kind: WorkflowKind;

    /// Sub-stage entered on initialization
    fn entry_sub_stage(&self) -> SubStageOf<Self>;

    /// Reject malformed input before anything is persisted
    fn validate(&self, _input: &InputOf<Self>) -> SkeinResult<()> {
        Ok(())
    }

    /// Scratch state of a fresh instance
    fn initial_work(&self, _input: &InputOf<Self>) -> WorkOf<Self> {
        Default::default()
    }

    /// Compute the next update for a `Started` instance.
    ///
    /// Must derive purely from `instance`. Errors fail the instance unless
    /// they are retryable and the step is idempotent.
    async fn handle_sub_stage(
        &self,
        instance: &WorkflowInstance<Self::Kind>,
    ) -> SkeinResult<SelfUpdate<Self::Kind>>;

    /// Whether a step can be re-run on a retryable error without
    /// duplicating side effects
    fn step_is_retryable(&self, _sub_stage: &SubStageOf<Self>) -> bool {
        false
    }
}
