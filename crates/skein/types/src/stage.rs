//! Task stages: the coarse, monotonic lifecycle of every workflow instance

use serde::{Deserialize, Serialize};

/// The lifecycle stage of a workflow instance
///
/// Stages form the partial order `Created < Started < {Finished, Failed,
/// Cancelled}`. The three terminal stages are mutually unordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    /// Persisted but not yet initialized
    #[default]
    Created,
    /// Self-driving loop active
    Started,
    /// Completed with a result
    Finished,
    /// Failed with a reason
    Failed,
    /// Halted by a cancellation request
    Cancelled,
}

impl TaskStage {
    /// Position in the total order over ranks (terminal stages share a rank)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Started => 1,
            Self::Finished | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Whether an update carrying `next` may be applied to an instance in
    /// this stage. Staying in `Started` is allowed (sub-stage progress);
    /// staying in any other stage is not a transition.
    pub fn can_transition_to(&self, next: TaskStage) -> bool {
        match (self, next) {
            (Self::Started, Self::Started) => true,
            (Self::Created, Self::Cancelled) => false,
            (from, to) => !from.is_terminal() && to.rank() > from.rank(),
        }
    }

    /// Storage-native name, as persisted in instance documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskStage; 5] = [
        TaskStage::Created,
        TaskStage::Started,
        TaskStage::Finished,
        TaskStage::Failed,
        TaskStage::Cancelled,
    ];

    #[test]
    fn test_terminal_stages() {
        assert!(!TaskStage::Created.is_terminal());
        assert!(!TaskStage::Started.is_terminal());
        assert!(TaskStage::Finished.is_terminal());
        assert!(TaskStage::Failed.is_terminal());
        assert!(TaskStage::Cancelled.is_terminal());
    }

    #[test]
    fn test_forward_transitions() {
        assert!(TaskStage::Created.can_transition_to(TaskStage::Started));
        assert!(TaskStage::Created.can_transition_to(TaskStage::Failed));
        assert!(TaskStage::Started.can_transition_to(TaskStage::Started));
        assert!(TaskStage::Started.can_transition_to(TaskStage::Finished));
        assert!(TaskStage::Started.can_transition_to(TaskStage::Cancelled));
    }

    #[test]
    fn test_cancel_only_from_started() {
        assert!(!TaskStage::Created.can_transition_to(TaskStage::Cancelled));
        assert!(TaskStage::Started.can_transition_to(TaskStage::Cancelled));
    }

    #[test]
    fn test_nothing_leaves_terminal() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_never_moves_backwards() {
        for from in ALL {
            for to in ALL {
                if from.can_transition_to(to) {
                    assert!(to.rank() >= from.rank());
                }
            }
        }
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&TaskStage::Started).unwrap();
        assert_eq!(json, "\"STARTED\"");
        assert_eq!(TaskStage::Cancelled.to_string(), "CANCELLED");
    }
}
