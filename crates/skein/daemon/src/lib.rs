//! Skein daemon library
//!
//! This module provides the components behind `skeind`:
//! - REST API for submitting and inspecting workflows and paging results
//! - Layered configuration
//! - Server lifecycle with the expiration sweeper

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use api::{create_router, AppState};
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
