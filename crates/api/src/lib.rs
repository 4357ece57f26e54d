// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Workflow Billing API Library
//!
//! HTTP surface for per-workflow billing: authentication, routing and the
//! translation of billing errors into JSON responses.

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
