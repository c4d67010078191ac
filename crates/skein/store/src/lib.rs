//! Skein document store
//!
//! The store is the only shared mutable resource in Skein. This crate
//! defines the boundary every other crate talks to:
//!
//! - durable `put`/`get` of JSON documents by [`Link`](skein_types::Link)
//! - predicate queries over document fields ([`QuerySpec`])
//! - paginated results behind expiring page links ([`StorePage`])
//! - a TTL sweep removing expired documents and page snapshots
//!
//! [`InMemoryDocumentStore`] is the development and test backend.

#![deny(unsafe_code)]

mod document;
mod error;
pub mod eval;
mod memory;
mod query;
mod traits;

pub use document::Document;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDocumentStore;
pub use query::{PageLink, QueryResult, QuerySpec, StorePage};
pub use traits::DocumentStore;
