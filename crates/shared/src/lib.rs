#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Workflow Billing shared types
//!
//! Types and database helpers used by both the billing crate and the API server.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{AgentStatus, AppRole, ParseEnumError, WorkflowAction};
