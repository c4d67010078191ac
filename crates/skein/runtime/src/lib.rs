//! Skein workflow runtime
//!
//! Drives durable workflow instances through their stages:
//!
//! ```text
//! submit ─► CREATED ─► initialize ─► STARTED ─┬─► FINISHED
//!                                    ▲   │    ├─► FAILED
//!                                    └───┘    └─► CANCELLED
//!                              handle_sub_stage
//! ```
//!
//! A workflow type implements [`Workflow`]: given the persisted instance
//! it returns the next [`SelfUpdate`](skein_types::SelfUpdate). The
//! runtime commits each update before computing the next one, so every
//! step starts from durable state. Steps run on a partitioned worker pool
//! (or inline via [`WorkflowRuntime::run_until_terminal`]); each instance
//! has one owning node and one worker.

#![deny(unsafe_code)]

pub mod config;
pub mod events;
pub mod ownership;
pub mod runtime;
pub mod sweeper;
pub mod transition;
pub mod workflow;

pub use config::RuntimeConfig;
pub use events::InstanceEvent;
pub use ownership::{partition, NodeId, NodeSelector, RendezvousSelector};
pub use runtime::{StepOutcome, WorkflowRuntime};
pub use sweeper::{ExpirationSweeper, Sweep, SweepReport};
pub use transition::instance_link;
pub use workflow::{InputOf, SubStageOf, WorkOf, Workflow};
