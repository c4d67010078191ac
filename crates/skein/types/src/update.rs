//! Self-update messages and idempotent patch application

use crate::{SkeinError, SkeinResult, TaskFailure, TaskStage, WorkflowInstance, WorkflowKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A state-transition instruction an instance issues to itself
///
/// Fields left as `None` keep their current value on the instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "", rename_all = "camelCase")]
pub struct SelfUpdate<K: WorkflowKind> {
    pub stage: TaskStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<K::SubStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work: Option<K::Work>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<K::Output>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Instance version the update was computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub based_on: Option<u64>,
}

impl<K: WorkflowKind> SelfUpdate<K> {
    fn stage(stage: TaskStage) -> Self {
        Self {
            stage,
            sub_stage: None,
            work: None,
            result: None,
            failure: None,
            expires_at: None,
            based_on: None,
        }
    }

    /// Enter `Started` at the given sub-stage
    pub fn start(sub_stage: K::SubStage) -> Self {
        Self {
            sub_stage: Some(sub_stage),
            ..Self::stage(TaskStage::Started)
        }
    }

    /// Stay in `Started`, moving to `sub_stage` with new scratch state
    pub fn proceed(sub_stage: K::SubStage, work: K::Work) -> Self {
        Self {
            sub_stage: Some(sub_stage),
            work: Some(work),
            ..Self::stage(TaskStage::Started)
        }
    }

    pub fn finish(result: K::Output) -> Self {
        Self {
            result: Some(result),
            ..Self::stage(TaskStage::Finished)
        }
    }

    pub fn fail(failure: TaskFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::stage(TaskStage::Failed)
        }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(TaskFailure::cancelled(reason)),
            ..Self::stage(TaskStage::Cancelled)
        }
    }

    pub fn with_work(mut self, work: K::Work) -> Self {
        self.work = Some(work);
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn based_on(mut self, version: u64) -> Self {
        self.based_on = Some(version);
        self
    }
}

/// What applying an update did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// State changed and must be persisted
    Applied,
    /// Duplicate of an already-applied update; state unchanged
    Replayed,
}

impl<K: WorkflowKind> WorkflowInstance<K> {
    /// Apply a self-update under the monotonic stage order.
    ///
    /// Replaying an update into the stage an instance already reached is a
    /// no-op, as is a stale update computed against an older version.
    /// Moving backwards, or away from a terminal stage, is rejected.
    pub fn apply_update(&mut self, update: SelfUpdate<K>) -> SkeinResult<UpdateOutcome> {
        let reachable = self.stage.can_transition_to(update.stage);

        if self.stage.is_terminal() || update.based_on.is_some_and(|v| v < self.version) {
            if update.stage == self.stage || (reachable && !self.stage.is_terminal()) {
                return Ok(UpdateOutcome::Replayed);
            }
            return Err(SkeinError::InvalidTransition {
                from: self.stage,
                to: update.stage,
            });
        }

        if !reachable {
            return Err(SkeinError::InvalidTransition {
                from: self.stage,
                to: update.stage,
            });
        }

        self.stage = update.stage;
        if let Some(sub_stage) = update.sub_stage {
            self.sub_stage = Some(sub_stage);
        }
        if let Some(work) = update.work {
            self.work = work;
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.failure.is_some() {
            self.failure = update.failure;
        }
        if update.expires_at.is_some() {
            self.expires_at = update.expires_at;
        }
        self.version += 1;
        self.updated_at = Utc::now();
        self.record_transition();

        Ok(UpdateOutcome::Applied)
    }
}
