//! Skein Domain Types
//!
//! Skein workflows are **durable, self-driving state machines**. An instance
//! is persisted as a single document and advanced only by update messages its
//! own stage handler issues, one sub-stage at a time.
//!
//! # Key Concepts
//!
//! - **WorkflowInstance**: the persisted `(stage, sub_stage, work)` tuple of
//!   one long-running operation, plus its input, result and failure.
//! - **TaskStage**: the coarse lifecycle. Transitions are monotonic:
//!   `Created < Started < {Finished, Failed, Cancelled}`.
//! - **SelfUpdate**: the state-transition message an instance issues to
//!   itself to move to its next sub-stage.
//! - **FilterTree**: the client-facing boolean filter over entity fields.
//! - **QueryTree**: the storage-native query a filter translates into.
//! - **ResultPage**: one page of a paginated result with chained cursors.
//!
//! # Design Principles
//!
//! 1. Instances are never edited by outside parties, only by their own
//!    stage handler running on the owning node.
//! 2. Stage handlers derive everything from persisted state, so a replayed
//!    callback re-computes the same next step.
//! 3. Terminal instances are immutable apart from no-op replays.

#![deny(unsafe_code)]

mod errors;
mod filter;
mod instance;
mod page;
mod query;
mod stage;
mod update;

pub use errors::*;
pub use filter::*;
pub use instance::*;
pub use page::*;
pub use query::*;
pub use stage::*;
pub use update::*;
