//! # Skein Bulk
//!
//! Bulk fan-out over a worklist of resources. Items are created one at a
//! time through a [`ResourceAdapter`]; retryable failures go back to the
//! tail of the worklist until [`MAX_ATTEMPTS`], everything else is
//! recorded. Created resources then get their side effect triggered in
//! concurrent batches of [`SIDE_EFFECT_BATCH_SIZE`], and the instance
//! finishes with a [`BulkReport`] holding both partitions.

pub mod adapter;
pub mod workflow;
pub mod worklist;

pub use adapter::{
    slug, AdapterError, AdapterRegistry, ResourceAdapter, ResourceKind, ResourceSpec,
    StoreAccountAdapter, KIND_ENUMERATION_REQUEST,
};
pub use workflow::{BulkInput, BulkKind, BulkStage, BulkWorkflow};
pub use worklist::{
    BulkReport, BulkWork, FailureRecord, SideEffectOutcome, SideEffectStatus, SuccessRecord,
    WorklistItem, MAX_ATTEMPTS, MAX_ATTEMPTS_REASON, SIDE_EFFECT_BATCH_SIZE,
};
