//! REST API module for external integrations
//!
//! Provides a read-only HTTP API over the managed ComponentConfigs plus the
//! health and metrics endpoints.

mod dto;
mod handlers;
mod server;

pub use dto::{ConfigDetailResponse, ConfigListResponse, ConfigSummary, ErrorResponse, HealthResponse};
pub use server::{router, run_server, ApiState};
