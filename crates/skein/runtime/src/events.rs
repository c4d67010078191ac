//! Instance lifecycle events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_types::{TaskStage, WorkflowInstanceId};

/// Broadcast after every accepted transition
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceEvent {
    pub instance_id: WorkflowInstanceId,
    pub kind: String,
    pub stage: TaskStage,
    pub version: u64,
    pub at: DateTime<Utc>,
}

impl InstanceEvent {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}
