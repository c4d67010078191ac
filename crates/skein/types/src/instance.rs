//! Workflow instances: the persisted state of one long-running operation
//!
//! A WorkflowInstance is the `(stage, sub_stage, work)` tuple a workflow
//! handler reads to compute its next step, plus the immutable input, the
//! eventual result or failure, and the ordered record of every transition.

use crate::TaskStage;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

// ── Workflow Kind ────────────────────────────────────────────────────

/// The payload types of one workflow type
///
/// Implemented by a zero-sized marker per workflow type. The runtime is
/// generic over the kind, so instances stay strongly typed while being
/// persisted as plain documents.
pub trait WorkflowKind: Clone + Debug + Send + Sync + 'static {
    /// Document kind under which instances of this type are persisted
    const KIND: &'static str;

    /// Workflow-specific progress marker within `TaskStage::Started`
    type SubStage: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Immutable request payload
    type Input: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Mutable scratch state (worklists, accumulators)
    type Work: Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Materialized result of a finished instance
    type Output: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
}

// ── Instance Identifier ──────────────────────────────────────────────

/// Unique identifier for a workflow instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowInstanceId(pub String);

impl WorkflowInstanceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for WorkflowInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Instance ────────────────────────────────────────────────

/// A durable workflow instance
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "", rename_all = "camelCase")]
pub struct WorkflowInstance<K: WorkflowKind> {
    /// Unique instance identifier
    pub id: WorkflowInstanceId,
    /// The workflow type (`WorkflowKind::KIND`)
    pub kind: String,
    /// Current lifecycle stage
    pub stage: TaskStage,
    /// Current sub-stage; set by initialization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<K::SubStage>,
    /// Request payload
    pub input: K::Input,
    /// Scratch state owned by the stage handler
    pub work: K::Work,
    /// Result of a finished instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<K::Output>,
    /// Failure of a failed or cancelled instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    /// Absolute expiration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Node that created the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Number of accepted updates
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered record of every accepted transition
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

impl<K: WorkflowKind> WorkflowInstance<K> {
    /// Create a new instance in `TaskStage::Created`
    pub fn new(input: K::Input, work: K::Work) -> Self {
        let now = Utc::now();
        let mut instance = Self {
            id: WorkflowInstanceId::generate(),
            kind: K::KIND.to_string(),
            stage: TaskStage::Created,
            sub_stage: None,
            input,
            work,
            result: None,
            failure: None,
            expires_at: None,
            owner: None,
            version: 0,
            created_at: now,
            updated_at: now,
            transitions: Vec::new(),
        };
        instance.record_transition();
        instance
    }

    pub fn with_id(mut self, id: WorkflowInstanceId) -> Self {
        self.id = id;
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    // ── Query methods ────────────────────────────────────────────────

    /// Check if the self-driving loop is running
    pub fn is_active(&self) -> bool {
        self.stage == TaskStage::Started
    }

    /// Check if the instance is terminal (finished, failed, or cancelled)
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Check if the instance has passed its expiration
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Human-readable failure reason, if any
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.reason.as_str())
    }

    /// The observed sequence of stages, one entry per accepted transition
    pub fn stage_history(&self) -> Vec<TaskStage> {
        self.transitions.iter().map(|t| t.stage).collect()
    }

    // ── Internal ─────────────────────────────────────────────────────

    pub(crate) fn record_transition(&mut self) {
        self.transitions.push(TransitionRecord {
            sequence: self.transitions.len() as u64,
            stage: self.stage,
            sub_stage: self.sub_stage.as_ref().map(|s| format!("{:?}", s)),
            at: self.updated_at,
        });
    }
}

// ── Failure ──────────────────────────────────────────────────────────

/// Why an instance failed or was cancelled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Human-readable reason, preserved verbatim from the cause
    pub reason: String,
    /// Machine-readable error code
    pub code: String,
}

impl TaskFailure {
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            code: code.into(),
        }
    }

    /// Failure recorded by the expiration sweep
    pub fn expired() -> Self {
        Self::new("EXPIRED", "Expired")
    }

    /// Failure recorded when a caller cancels a running instance
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new("CANCELLED", reason)
    }
}

impl From<&crate::SkeinError> for TaskFailure {
    fn from(err: &crate::SkeinError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// ── Transition record ────────────────────────────────────────────────

/// An entry in the instance's transition history
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    /// Monotonically increasing sequence number
    pub sequence: u64,
    pub stage: TaskStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Clone, Debug, Default)]
    pub struct CounterKind;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub enum CounterStep {
        Count,
        Report,
    }

    impl WorkflowKind for CounterKind {
        const KIND: &'static str = "counter";
        type SubStage = CounterStep;
        type Input = u32;
        type Work = u32;
        type Output = String;
    }

    pub fn make_instance() -> WorkflowInstance<CounterKind> {
        WorkflowInstance::new(3, 0)
    }

    #[test]
    fn test_create_instance() {
        let inst = make_instance();
        assert_eq!(inst.stage, TaskStage::Created);
        assert_eq!(inst.kind, "counter");
        assert!(!inst.is_active());
        assert!(!inst.is_terminal());
        assert_eq!(inst.stage_history(), vec![TaskStage::Created]);
    }

    #[test]
    fn test_expiration() {
        let now = Utc::now();
        let inst = make_instance().with_expiration(now + chrono::Duration::seconds(10));
        assert!(!inst.is_expired_at(now));
        assert!(inst.is_expired_at(now + chrono::Duration::seconds(10)));
        assert!(!make_instance().is_expired_at(now));
    }

    #[test]
    fn test_document_roundtrip_keeps_typed_payloads() {
        let mut inst = make_instance().with_owner("node-a");
        inst.sub_stage = Some(CounterStep::Report);
        let value = serde_json::to_value(&inst).unwrap();
        assert_eq!(value["stage"], "CREATED");
        assert_eq!(value["subStage"], "Report");

        let back: WorkflowInstance<CounterKind> = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, inst.id);
        assert_eq!(back.sub_stage, Some(CounterStep::Report));
        assert_eq!(back.owner.as_deref(), Some("node-a"));
    }

    #[test]
    fn test_instance_id() {
        let id = WorkflowInstanceId::generate();
        assert!(!id.0.is_empty());
        assert!(id.short().len() <= 8);

        let named = WorkflowInstanceId::new("inst-1");
        assert_eq!(format!("{}", named), "inst-1");
    }

    #[test]
    fn test_failure_from_error() {
        let failure = TaskFailure::from(&crate::SkeinError::Store("disk full".into()));
        assert_eq!(failure.code, "STORE_ERROR");
        assert_eq!(failure.reason, "Store error: disk full");
        assert_eq!(TaskFailure::expired().reason, "Expired");
    }
}
